use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};

use pawmarket_types::models::{ConversationId, MessageId, NotificationKind, UserId};

use crate::models::{ConversationPreview, ConversationRow, MessageRow, NotificationRow, UserRow};
use crate::{Database, StoreError, StoreResult};

const CONVERSATION_COLUMNS: &str = "id, user_low, user_high, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, text, created_at, is_read";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        username: &str,
        display_name: Option<&str>,
        email: Option<&str>,
    ) -> StoreResult<UserRow> {
        let created_at = now();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, display_name, email, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![username, display_name, email, encode_ts(&created_at)],
            )?;
            Ok(UserRow {
                id: conn.last_insert_rowid(),
                username: username.to_string(),
                display_name: display_name.map(str::to_string),
                email: email.map(str::to_string),
                created_at,
            })
        })
    }

    pub fn get_user(&self, id: UserId) -> StoreResult<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, id))
    }

    /// Batch-fetch users for a set of ids. Unknown ids are skipped.
    pub fn get_users(&self, ids: &[UserId]) -> StoreResult<Vec<UserRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, username, display_name, email, created_at FROM users WHERE id IN ({}) ORDER BY id",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(ids.iter()), user_from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Conversations --

    /// Lookup by unordered pair.
    pub fn find_conversation(&self, a: UserId, b: UserId) -> StoreResult<Option<ConversationRow>> {
        let (low, high) = ordered_pair(a, b)?;
        self.with_conn(|conn| query_conversation_by_pair(conn, low, high))
    }

    pub fn create_conversation(&self, a: UserId, b: UserId) -> StoreResult<ConversationRow> {
        self.create_conversation_tracked(a, b)
            .map(|(conversation, _)| conversation)
    }

    /// Insert the conversation for `{a, b}` unless one already exists.
    /// Returns the surviving row and whether this call created it.
    ///
    /// The `UNIQUE (user_low, user_high)` constraint decides races: a losing
    /// insert is a no-op and the follow-up select returns the winner's row.
    pub fn create_conversation_tracked(
        &self,
        a: UserId,
        b: UserId,
    ) -> StoreResult<(ConversationRow, bool)> {
        let (low, high) = ordered_pair(a, b)?;
        let created_at = now();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            for user_id in [low, high] {
                if query_user(&tx, user_id)?.is_none() {
                    return Err(StoreError::UserNotFound(user_id));
                }
            }

            let inserted = tx.execute(
                "INSERT INTO conversations (user_low, user_high, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT (user_low, user_high) DO NOTHING",
                rusqlite::params![low, high, encode_ts(&created_at)],
            )?;

            let conversation = query_conversation_by_pair(&tx, low, high)?
                .ok_or_else(|| StoreError::Corrupt(format!("conversation ({}, {}) vanished", low, high)))?;
            tx.commit()?;

            Ok((conversation, inserted == 1))
        })
    }

    pub fn get_conversation(&self, id: ConversationId) -> StoreResult<Option<ConversationRow>> {
        self.with_conn(|conn| query_conversation(conn, id))
    }

    /// Load a conversation, failing unless `user_id` is one of its participants.
    pub fn participant_conversation(
        &self,
        id: ConversationId,
        user_id: UserId,
    ) -> StoreResult<ConversationRow> {
        self.with_conn(|conn| require_participant(conn, id, user_id))
    }

    /// Conversations of `user_id`, most recently active first.
    pub fn list_conversations(&self, user_id: UserId) -> StoreResult<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM conversations
                 WHERE user_low = ?1 OR user_high = ?1
                 ORDER BY updated_at DESC, id DESC",
                CONVERSATION_COLUMNS
            ))?;

            let rows = stmt
                .query_map([user_id], conversation_from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Same ordering as `list_conversations`, each with its latest message.
    pub fn list_conversation_previews(&self, user_id: UserId) -> StoreResult<Vec<ConversationPreview>> {
        // LEFT JOIN the newest message per conversation in a single query (no N+1)
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.user_low, c.user_high, c.created_at, c.updated_at,
                        m.id, m.conversation_id, m.sender_id, m.text, m.created_at, m.is_read
                 FROM conversations c
                 LEFT JOIN messages m ON m.id = (
                     SELECT id FROM messages
                     WHERE conversation_id = c.id
                     ORDER BY created_at DESC, id DESC
                     LIMIT 1
                 )
                 WHERE c.user_low = ?1 OR c.user_high = ?1
                 ORDER BY c.updated_at DESC, c.id DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    let conversation = conversation_from_row(row)?;
                    let last_message = match row.get::<_, Option<MessageId>>(5)? {
                        Some(_) => Some(message_from_row_at(row, 5)?),
                        None => None,
                    };
                    Ok(ConversationPreview {
                        conversation,
                        last_message,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Deletes the conversation and, through the cascade, all of its messages.
    pub fn delete_conversation(&self, id: ConversationId) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM conversations WHERE id = ?1", [id])?;
            Ok(deleted == 1)
        })
    }

    // -- Messages --

    /// Persist a message and bump the conversation's `updated_at`, atomically.
    /// Returns the conversation as of the commit along with the new message.
    ///
    /// `text` is stored trimmed. A message is never timestamped earlier than
    /// the previous one in the same conversation, so id order and
    /// `created_at` order always agree.
    pub fn append_message(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        text: &str,
    ) -> StoreResult<(ConversationRow, MessageRow)> {
        let text = text.trim();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let mut conversation = require_participant(&tx, conversation_id, sender_id)?;
            if text.is_empty() {
                return Err(StoreError::EmptyText);
            }

            let previous: Option<String> = tx.query_row(
                "SELECT MAX(created_at) FROM messages WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )?;
            let mut created_at = now();
            if let Some(previous) = previous {
                let previous = decode_ts(&previous).map_err(|e| StoreError::Corrupt(e.to_string()))?;
                created_at = created_at.max(previous);
            }
            let stamp = encode_ts(&created_at);

            tx.execute(
                "INSERT INTO messages (conversation_id, sender_id, text, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![conversation_id, sender_id, text, stamp],
            )?;
            let id = tx.last_insert_rowid();

            tx.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                rusqlite::params![stamp, conversation_id],
            )?;
            tx.commit()?;

            conversation.updated_at = created_at;
            let message = MessageRow {
                id,
                conversation_id,
                sender_id,
                text: text.to_string(),
                created_at,
                is_read: false,
            };
            Ok((conversation, message))
        })
    }

    /// Full history, oldest first.
    pub fn list_messages(&self, conversation_id: ConversationId) -> StoreResult<Vec<MessageRow>> {
        self.list_messages_after(conversation_id, None, None)
    }

    /// History strictly after the message `after`, oldest first, at most `limit` rows.
    pub fn list_messages_after(
        &self,
        conversation_id: ConversationId,
        after: Option<MessageId>,
        limit: Option<u32>,
    ) -> StoreResult<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages
                 WHERE conversation_id = ?1 AND id > ?2
                 ORDER BY created_at ASC, id ASC
                 LIMIT ?3",
                MESSAGE_COLUMNS
            ))?;

            // SQLite treats a negative LIMIT as unbounded
            let limit = limit.map(i64::from).unwrap_or(-1);
            let rows = stmt
                .query_map(
                    rusqlite::params![conversation_id, after.unwrap_or(0), limit],
                    |row| message_from_row_at(row, 0),
                )?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn last_message(&self, conversation_id: ConversationId) -> StoreResult<Option<MessageRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM messages WHERE conversation_id = ?1
                     ORDER BY created_at DESC, id DESC LIMIT 1",
                    MESSAGE_COLUMNS
                ),
                [conversation_id],
                |row| message_from_row_at(row, 0),
            )
            .optional()
        })
    }

    // -- Notifications --

    pub fn create_notification(
        &self,
        user_id: UserId,
        message: &str,
        kind: NotificationKind,
        link: Option<&str>,
    ) -> StoreResult<NotificationRow> {
        let created_at = now();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (user_id, message, notification_type, link, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![user_id, message, kind.as_str(), link, encode_ts(&created_at)],
            )?;
            Ok(NotificationRow {
                id: conn.last_insert_rowid(),
                user_id,
                message: message.to_string(),
                notification_type: kind.as_str().to_string(),
                is_read: false,
                link: link.map(str::to_string),
                created_at,
            })
        })
    }

    /// Newest first.
    pub fn list_notifications(&self, user_id: UserId) -> StoreResult<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, message, notification_type, is_read, link, created_at
                 FROM notifications WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(NotificationRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        message: row.get(2)?,
                        notification_type: row.get(3)?,
                        is_read: row.get(4)?,
                        link: row.get(5)?,
                        created_at: ts_column(row, 6)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn ordered_pair(a: UserId, b: UserId) -> StoreResult<(UserId, UserId)> {
    if a == b {
        return Err(StoreError::InvalidPair);
    }
    Ok((a.min(b), a.max(b)))
}

fn require_participant(
    conn: &Connection,
    id: ConversationId,
    user_id: UserId,
) -> StoreResult<ConversationRow> {
    let conversation = query_conversation(conn, id)?.ok_or(StoreError::ConversationNotFound(id))?;
    if !conversation.has_participant(user_id) {
        return Err(StoreError::NotParticipant {
            conversation_id: id,
            user_id,
        });
    }
    Ok(conversation)
}

fn query_user(conn: &Connection, id: UserId) -> StoreResult<Option<UserRow>> {
    conn.query_row(
        "SELECT id, username, display_name, email, created_at FROM users WHERE id = ?1",
        [id],
        user_from_row,
    )
    .optional()
}

fn query_conversation(conn: &Connection, id: ConversationId) -> StoreResult<Option<ConversationRow>> {
    conn.query_row(
        &format!("SELECT {} FROM conversations WHERE id = ?1", CONVERSATION_COLUMNS),
        [id],
        conversation_from_row,
    )
    .optional()
}

fn query_conversation_by_pair(
    conn: &Connection,
    low: UserId,
    high: UserId,
) -> StoreResult<Option<ConversationRow>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM conversations WHERE user_low = ?1 AND user_high = ?2",
            CONVERSATION_COLUMNS
        ),
        [low, high],
        conversation_from_row,
    )
    .optional()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        email: row.get(3)?,
        created_at: ts_column(row, 4)?,
    })
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        user_low: row.get(1)?,
        user_high: row.get(2)?,
        created_at: ts_column(row, 3)?,
        updated_at: ts_column(row, 4)?,
    })
}

fn message_from_row_at(row: &Row<'_>, base: usize) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(base)?,
        conversation_id: row.get(base + 1)?,
        sender_id: row.get(base + 2)?,
        text: row.get(base + 3)?,
        created_at: ts_column(row, base + 4)?,
        is_read: row.get(base + 5)?,
    })
}

// -- Timestamps --
//
// Stored as fixed-width RFC 3339 UTC with microseconds so that string order
// is time order.

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

fn decode_ts(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}

fn ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    decode_ts(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> StoreResult<Option<T>>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> StoreResult<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
