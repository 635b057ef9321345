use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error};
use uuid::Uuid;

use pawmarket_types::events::OutboundFrame;
use pawmarket_types::models::{ConversationId, UserId};

pub type ConnectionId = Uuid;

/// A serialized outbound frame, shared by every member of a broadcast.
pub type Frame = Arc<str>;

/// A connection's seat in a conversation group. Frames broadcast to the
/// group arrive on `rx` until the seat is released with
/// [`GroupRegistry::leave`].
pub struct Membership {
    pub conn_id: ConnectionId,
    pub rx: mpsc::UnboundedReceiver<Frame>,
}

struct Member {
    user_id: UserId,
    tx: mpsc::UnboundedSender<Frame>,
}

/// Live connections grouped by conversation. Cloning shares the same table.
#[derive(Clone, Default)]
pub struct GroupRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    /// conversation_id -> (conn_id -> member)
    groups: RwLock<HashMap<ConversationId, HashMap<ConnectionId, Member>>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to the conversation's group.
    pub async fn join(&self, conversation_id: ConversationId, user_id: UserId) -> Membership {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .groups
            .write()
            .await
            .entry(conversation_id)
            .or_default()
            .insert(conn_id, Member { user_id, tx });

        debug!("Connection {} (user {}) joined group {}", conn_id, user_id, conversation_id);
        Membership { conn_id, rx }
    }

    /// Remove a connection from its group. Returns false if it was already gone.
    pub async fn leave(&self, conversation_id: ConversationId, conn_id: ConnectionId) -> bool {
        let mut groups = self.inner.groups.write().await;
        let Some(group) = groups.get_mut(&conversation_id) else {
            return false;
        };

        let removed = group.remove(&conn_id).is_some();
        if group.is_empty() {
            groups.remove(&conversation_id);
        }
        if removed {
            debug!("Connection {} left group {}", conn_id, conversation_id);
        }
        removed
    }

    /// Serialize `frame` once and queue it for every member of the group.
    /// Returns how many members it was queued for.
    pub async fn broadcast(&self, conversation_id: ConversationId, frame: &OutboundFrame) -> usize {
        match frame.to_json() {
            Ok(json) => self.broadcast_raw(conversation_id, Arc::from(json)).await,
            Err(e) => {
                error!("Failed to serialize frame for group {}: {}", conversation_id, e);
                0
            }
        }
    }

    pub async fn broadcast_raw(&self, conversation_id: ConversationId, frame: Frame) -> usize {
        let groups = self.inner.groups.read().await;
        let Some(group) = groups.get(&conversation_id) else {
            return 0;
        };

        // A member whose receiver is gone is mid-disconnect; skip it and
        // keep delivering to the rest.
        group
            .values()
            .filter(|member| member.tx.send(frame.clone()).is_ok())
            .count()
    }

    /// Users with at least one live connection in the group.
    pub async fn live_users(&self, conversation_id: ConversationId) -> HashSet<UserId> {
        self.inner
            .groups
            .read()
            .await
            .get(&conversation_id)
            .map(|group| group.values().map(|m| m.user_id).collect())
            .unwrap_or_default()
    }

    pub async fn member_count(&self, conversation_id: ConversationId) -> usize {
        self.inner
            .groups
            .read()
            .await
            .get(&conversation_id)
            .map_or(0, HashMap::len)
    }
}
