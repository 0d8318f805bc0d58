//! Server-side collaborators backed by the session registry.

use crate::metrics;
use async_trait::async_trait;
use chime_core::{
    CollaboratorError, InMemoryNotificationStore, InMemoryRooms, NotificationStore,
    RealtimeBroadcaster, SessionRegistry,
};
use chime_protocol::{ChatReceived, Frame, Notification, NotificationFields, UserId};
use std::sync::Arc;
use tracing::trace;

/// Delivers chat events and unread counters to open sessions.
pub struct SessionBroadcaster {
    sessions: Arc<SessionRegistry>,
    rooms: Arc<InMemoryRooms>,
}

impl SessionBroadcaster {
    /// Create a broadcaster over a session registry.
    #[must_use]
    pub fn new(sessions: Arc<SessionRegistry>, rooms: Arc<InMemoryRooms>) -> Self {
        Self { sessions, rooms }
    }
}

#[async_trait]
impl RealtimeBroadcaster for SessionBroadcaster {
    fn broadcast(&self, uid: &UserId, event: &ChatReceived) {
        let delivered = self.sessions.send(uid, Frame::ChatReceive(event.clone()));
        if delivered > 0 {
            metrics::record_broadcast();
        }
        trace!(uid = %uid, sessions = delivered, "Chat event broadcast");
    }

    async fn refresh_unread(&self, uid: &UserId) -> Result<(), CollaboratorError> {
        let count = self.rooms.unread_count(uid);
        self.sessions.send(uid, Frame::UnreadCount { count });
        Ok(())
    }
}

/// Notification store that records metrics around an in-memory store.
pub struct MeteredStore {
    inner: Arc<InMemoryNotificationStore>,
}

impl MeteredStore {
    #[must_use]
    pub fn new(inner: Arc<InMemoryNotificationStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl NotificationStore for MeteredStore {
    async fn create(&self, fields: NotificationFields) -> Result<Notification, CollaboratorError> {
        let result = self.inner.create(fields).await;
        if result.is_err() {
            metrics::record_error("notification_create");
        }
        result
    }

    async fn push(
        &self,
        notification: &Notification,
        uids: &[UserId],
    ) -> Result<(), CollaboratorError> {
        match self.inner.push(notification, uids).await {
            Ok(()) => {
                metrics::record_notification(uids.len());
                Ok(())
            }
            Err(e) => {
                metrics::record_error("notification_push");
                Err(e)
            }
        }
    }
}
