use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use pawmarket_db::models::{ConversationPreview, ConversationRow, MessageRow, UserRow};
use pawmarket_db::{Database, Directory, StoreError};
use pawmarket_types::api::ConversationResponse;
use pawmarket_types::events::OutboundFrame;
use pawmarket_types::models::{ConversationId, MessageId, NotificationKind, UserId};

use crate::registry::GroupRegistry;
use crate::{ChatError, Identity, IdentityProvider, Notifier};

/// Upper bound for a single history page.
pub const MAX_PAGE: u32 = 200;

/// Chat operations shared by the live gateway and the fallback API. Both
/// paths persist through the same store and fan out through the same
/// registry.
#[derive(Clone)]
pub struct ChatService {
    db: Arc<Database>,
    directory: Directory,
    registry: GroupRegistry,
    identity: Arc<dyn IdentityProvider>,
    notifier: Arc<dyn Notifier>,
}

impl ChatService {
    pub fn new(
        db: Arc<Database>,
        registry: GroupRegistry,
        identity: Arc<dyn IdentityProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            directory: Directory::new(db.clone()),
            db,
            registry,
            identity,
            notifier,
        }
    }

    pub fn registry(&self) -> &GroupRegistry {
        &self.registry
    }

    pub async fn authenticate(&self, credential: &str) -> Result<Identity, ChatError> {
        self.identity.resolve(credential).await
    }

    /// Fails unless `user_id` participates in the conversation.
    pub async fn authorize(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<ConversationRow, ChatError> {
        let db = self.db.clone();
        let conversation =
            tokio::task::spawn_blocking(move || db.participant_conversation(conversation_id, user_id))
                .await??;
        Ok(conversation)
    }

    /// Persist a message, then fan it out to the conversation's live group.
    /// Nothing is broadcast unless the message was stored.
    pub async fn send_message(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        text: &str,
    ) -> Result<MessageRow, ChatError> {
        let db = self.db.clone();
        let text = text.to_string();
        let (conversation, message) =
            tokio::task::spawn_blocking(move || db.append_message(conversation_id, sender_id, &text))
                .await??;

        let delivered = self
            .registry
            .broadcast(
                conversation_id,
                &OutboundFrame::Message {
                    message: message.payload(),
                },
            )
            .await;
        debug!(
            "Message {} in conversation {} delivered to {} live connection(s)",
            message.id, conversation_id, delivered
        );

        self.notify_offline_peers(&conversation, sender_id).await;
        Ok(message)
    }

    pub async fn get_messages(
        &self,
        conversation_id: ConversationId,
        caller_id: UserId,
        after: Option<MessageId>,
        limit: Option<u32>,
    ) -> Result<Vec<MessageRow>, ChatError> {
        let db = self.db.clone();
        let limit = limit.map(|l| l.min(MAX_PAGE));
        let messages = tokio::task::spawn_blocking(move || {
            db.participant_conversation(conversation_id, caller_id)?;
            db.list_messages_after(conversation_id, after, limit)
        })
        .await??;
        Ok(messages)
    }

    /// The caller's conversations, most recent first, each with a preview.
    pub async fn list_my_conversations(
        &self,
        caller_id: UserId,
    ) -> Result<Vec<ConversationResponse>, ChatError> {
        let db = self.db.clone();
        let views = tokio::task::spawn_blocking(move || {
            let previews = db.list_conversation_previews(caller_id)?;
            let views = with_participants(&db, previews)?;
            Ok::<_, StoreError>(views)
        })
        .await??;
        Ok(views)
    }

    pub async fn get_conversation(
        &self,
        conversation_id: ConversationId,
        caller_id: UserId,
    ) -> Result<ConversationResponse, ChatError> {
        let db = self.db.clone();
        let view = tokio::task::spawn_blocking(move || {
            let conversation = db.participant_conversation(conversation_id, caller_id)?;
            let last_message = db.last_message(conversation_id)?;
            single_view(&db, ConversationPreview { conversation, last_message })
        })
        .await??;
        Ok(view)
    }

    /// Find or create the conversation between the caller and `other_id`.
    /// The flag is true when this call created it.
    pub async fn start_conversation(
        &self,
        caller_id: UserId,
        other_id: UserId,
    ) -> Result<(ConversationResponse, bool), ChatError> {
        let db = self.db.clone();
        let directory = self.directory.clone();
        let (view, created) = tokio::task::spawn_blocking(move || {
            let (conversation, created) = directory.get_or_create(caller_id, other_id)?;
            let last_message = db.last_message(conversation.id)?;
            let view = single_view(&db, ConversationPreview { conversation, last_message })?;
            Ok::<_, StoreError>((view, created))
        })
        .await??;

        if created {
            info!("User {} started conversation {} with {}", caller_id, view.id, other_id);
        }
        Ok((view, created))
    }

    pub async fn delete_conversation(
        &self,
        conversation_id: ConversationId,
        caller_id: UserId,
    ) -> Result<(), ChatError> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            db.participant_conversation(conversation_id, caller_id)?;
            db.delete_conversation(conversation_id)
        })
        .await??;

        info!("User {} deleted conversation {}", caller_id, conversation_id);
        Ok(())
    }

    /// Queue a "new message" alert for each participant other than the
    /// sender with no live connection in the group. Never fails the send.
    async fn notify_offline_peers(&self, conversation: &ConversationRow, sender_id: UserId) {
        let live = self.registry.live_users(conversation.id).await;
        let offline: Vec<UserId> = conversation
            .participants()
            .into_iter()
            .filter(|&user_id| user_id != sender_id && !live.contains(&user_id))
            .collect();
        if offline.is_empty() {
            return;
        }

        let db = self.db.clone();
        let notifier = self.notifier.clone();
        let conversation_id = conversation.id;
        tokio::spawn(async move {
            let sender = match tokio::task::spawn_blocking(move || db.get_user(sender_id)).await {
                Ok(Ok(Some(user))) => user.username,
                Ok(Ok(None)) => format!("user {}", sender_id),
                Ok(Err(e)) => {
                    warn!("Skipping notification for conversation {}: {}", conversation_id, e);
                    return;
                }
                Err(e) => {
                    warn!("Skipping notification for conversation {}: {}", conversation_id, e);
                    return;
                }
            };

            let text = format!("New message from {}", sender);
            let link = format!("/chats/{}", conversation_id);
            for user_id in offline {
                if let Err(e) = notifier
                    .notify(user_id, &text, NotificationKind::Info, Some(&link))
                    .await
                {
                    warn!("Failed to notify user {} about conversation {}: {}", user_id, conversation_id, e);
                }
            }
        });
    }
}

fn single_view(db: &Database, preview: ConversationPreview) -> Result<ConversationResponse, StoreError> {
    with_participants(db, vec![preview])?
        .pop()
        .ok_or_else(|| StoreError::Corrupt("conversation view missing".into()))
}

/// Attach participant summaries, fetched in one batch for all previews.
fn with_participants(
    db: &Database,
    previews: Vec<ConversationPreview>,
) -> Result<Vec<ConversationResponse>, StoreError> {
    let mut ids: Vec<UserId> = previews
        .iter()
        .flat_map(|p| p.conversation.participants())
        .collect();
    ids.sort_unstable();
    ids.dedup();

    let users: HashMap<UserId, UserRow> = db
        .get_users(&ids)?
        .into_iter()
        .map(|user| (user.id, user))
        .collect();

    Ok(previews
        .into_iter()
        .map(|preview| {
            let conversation = preview.conversation;
            ConversationResponse {
                id: conversation.id,
                participants: conversation
                    .participants()
                    .iter()
                    .filter_map(|id| users.get(id).map(UserRow::summary))
                    .collect(),
                created_at: conversation.created_at,
                updated_at: conversation.updated_at,
                last_message: preview.last_message.as_ref().map(MessageRow::response),
            }
        })
        .collect())
}
