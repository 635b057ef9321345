use std::sync::Arc;

use tracing::debug;

use pawmarket_types::models::UserId;

use crate::models::ConversationRow;
use crate::{Database, StoreResult};

/// Finds or creates the single conversation between two users.
#[derive(Clone)]
pub struct Directory {
    db: Arc<Database>,
}

impl Directory {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Returns the conversation for `{a, b}` and whether this call created it.
    pub fn get_or_create(&self, a: UserId, b: UserId) -> StoreResult<(ConversationRow, bool)> {
        if let Some(existing) = self.db.find_conversation(a, b)? {
            return Ok((existing, false));
        }

        // Another caller may have won the race since the lookup; the store
        // resolves that to the same row.
        let (conversation, created) = self.db.create_conversation_tracked(a, b)?;
        if created {
            debug!("Created conversation {} between {} and {}", conversation.id, a, b);
        }
        Ok((conversation, created))
    }
}
