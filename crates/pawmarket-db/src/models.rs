//! Row types mapped straight from SQLite. Kept apart from the serde types in
//! pawmarket-types so the storage layer stays independent of the wire format.

use chrono::{DateTime, Utc};

use pawmarket_types::api::MessageResponse;
use pawmarket_types::models::{ConversationId, MessageId, MessagePayload, UserId, UserSummary};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    pub id: UserId,
    pub username: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            username: self.username.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRow {
    pub id: ConversationId,
    /// Smaller participant id.
    pub user_low: UserId,
    /// Larger participant id.
    pub user_high: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationRow {
    pub fn participants(&self) -> [UserId; 2] {
        [self.user_low, self.user_high]
    }

    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.user_low == user_id || self.user_high == user_id
    }

    /// The participant that is not `user_id`, if `user_id` is one of them.
    pub fn peer_of(&self, user_id: UserId) -> Option<UserId> {
        if user_id == self.user_low {
            Some(self.user_high)
        } else if user_id == self.user_high {
            Some(self.user_low)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
}

impl MessageRow {
    pub fn payload(&self) -> MessagePayload {
        MessagePayload {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            text: self.text.clone(),
            created_at: self.created_at,
        }
    }

    pub fn response(&self) -> MessageResponse {
        MessageResponse {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            text: self.text.clone(),
            created_at: self.created_at,
            is_read: self.is_read,
        }
    }
}

/// A conversation together with its most recent message, for list previews.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationPreview {
    pub conversation: ConversationRow,
    pub last_message: Option<MessageRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRow {
    pub id: i64,
    pub user_id: UserId,
    pub message: String,
    pub notification_type: String,
    pub is_read: bool,
    pub link: Option<String>,
    pub created_at: DateTime<Utc>,
}
