use std::sync::Arc;

use futures_util::future::BoxFuture;

use pawmarket_db::Database;
use pawmarket_types::models::{NotificationKind, UserId};

use crate::ChatError;

/// Side-channel alerts. Callers treat this as fire-and-forget.
pub trait Notifier: Send + Sync {
    fn notify<'a>(
        &'a self,
        user_id: UserId,
        text: &'a str,
        kind: NotificationKind,
        link: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), ChatError>>;
}

/// Writes notification records into the shared notifications table.
pub struct DbNotifier {
    db: Arc<Database>,
}

impl DbNotifier {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl Notifier for DbNotifier {
    fn notify<'a>(
        &'a self,
        user_id: UserId,
        text: &'a str,
        kind: NotificationKind,
        link: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), ChatError>> {
        let db = self.db.clone();
        let text = text.to_string();
        let link = link.map(str::to_string);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                db.create_notification(user_id, &text, kind, link.as_deref())
            })
            .await??;
            Ok(())
        })
    }
}
