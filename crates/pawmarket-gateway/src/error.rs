use thiserror::Error;

use pawmarket_db::StoreError;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ChatError {
    /// Infrastructure failures, as opposed to the caller being denied or
    /// sending something invalid.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Auth(_) => false,
            Self::Store(e) => e.is_transient(),
            Self::Task(_) => true,
        }
    }

    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::NotParticipant { .. } | StoreError::ConversationNotFound(_))
        )
    }
}
