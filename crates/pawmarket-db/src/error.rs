use thiserror::Error;

use pawmarket_types::models::{ConversationId, UserId};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a conversation needs two distinct participants")]
    InvalidPair,
    #[error("user {user_id} is not a participant of conversation {conversation_id}")]
    NotParticipant {
        conversation_id: ConversationId,
        user_id: UserId,
    },
    #[error("message text is empty")]
    EmptyText,
    #[error("conversation {0} not found")]
    ConversationNotFound(ConversationId),
    #[error("user {0} not found")]
    UserNotFound(UserId),
    #[error("database lock poisoned")]
    Poisoned,
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    /// Storage-level failures; retrying the single operation is safe.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Poisoned | Self::Sqlite(_) | Self::Corrupt(_))
    }
}
