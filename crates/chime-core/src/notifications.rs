//! In-memory notification store.

use crate::traits::{CollaboratorError, NotificationStore};
use async_trait::async_trait;
use chime_protocol::{Notification, NotificationFields, UserId};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Per-user notification inboxes.
///
/// Pushing a notification whose `nid` is already in an inbox replaces the
/// older record, so repeated flushes for one sender and room leave a single
/// entry per recipient.
#[derive(Debug, Default)]
pub struct InMemoryNotificationStore {
    inboxes: DashMap<UserId, Vec<Notification>>,
    created: AtomicU64,
}

impl InMemoryNotificationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications for a user, oldest first.
    #[must_use]
    pub fn inbox(&self, uid: &UserId) -> Vec<Notification> {
        self.inboxes
            .get(uid)
            .map(|inbox| inbox.clone())
            .unwrap_or_default()
    }

    /// Number of records created.
    #[must_use]
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn create(&self, fields: NotificationFields) -> Result<Notification, CollaboratorError> {
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(Notification::new(fields))
    }

    async fn push(
        &self,
        notification: &Notification,
        uids: &[UserId],
    ) -> Result<(), CollaboratorError> {
        for uid in uids {
            let mut inbox = self.inboxes.entry(uid.clone()).or_default();
            inbox.retain(|n| n.nid() != notification.nid());
            inbox.push(notification.clone());
        }
        debug!(nid = %notification.nid(), recipients = uids.len(), "Notification pushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chime_protocol::{Author, ChatMessage};

    fn fields(room: &str, content: &str) -> NotificationFields {
        let message = ChatMessage::new(room, Author::new("u1", "ann"), content);
        NotificationFields::chat(&"u1".into(), &room.into(), &message, false)
    }

    #[tokio::test]
    async fn test_push_replaces_same_nid() {
        let store = InMemoryNotificationStore::new();
        let recipients = [UserId::from("u2"), UserId::from("u3")];

        let first = store.create(fields("r1", "one")).await.unwrap();
        store.push(&first, &recipients).await.unwrap();
        let second = store.create(fields("r1", "two")).await.unwrap();
        store.push(&second, &recipients[..1]).await.unwrap();

        let inbox = store.inbox(&"u2".into());
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].fields.body_long, "two");
        assert_eq!(store.inbox(&"u3".into())[0].fields.body_long, "one");
        assert_eq!(store.created_count(), 2);
    }

    #[tokio::test]
    async fn test_distinct_rooms_keep_separate_records() {
        let store = InMemoryNotificationStore::new();
        let recipients = [UserId::from("u2")];

        let a = store.create(fields("r1", "a")).await.unwrap();
        let b = store.create(fields("r2", "b")).await.unwrap();
        store.push(&a, &recipients).await.unwrap();
        store.push(&b, &recipients).await.unwrap();

        let nids: Vec<_> = store
            .inbox(&"u2".into())
            .iter()
            .map(|n| n.nid().to_string())
            .collect();
        assert_eq!(nids, ["chat_u1_r1", "chat_u1_r2"]);
        assert!(store.inbox(&"u9".into()).is_empty());
    }
}
