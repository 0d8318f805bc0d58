//! Collaborator traits for the dispatcher.
//!
//! Presence, membership, blocking, realtime delivery and notification storage
//! all live outside the dispatcher. These traits are the narrow interface it
//! talks to them through.

use async_trait::async_trait;
use chime_protocol::{ChatReceived, Notification, NotificationFields, NotifyPayload, RoomId, UserId};
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by collaborators.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// Backing service could not be reached.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Presence lookup answered for the wrong number of users.
    #[error("Presence returned {actual} flags for {expected} users")]
    ReachabilityMismatch {
        /// Number of users asked about.
        expected: usize,
        /// Number of flags returned.
        actual: usize,
    },

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Room membership queries.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// All current members of a room. Unknown rooms have no members.
    async fn room_members(&self, room_id: &RoomId) -> Result<Vec<UserId>, CollaboratorError>;

    /// Whether the room has more than two members.
    async fn is_group_room(&self, room_id: &RoomId) -> Result<bool, CollaboratorError>;
}

/// Block rules and pluggable policy applied to the recipient set.
#[async_trait]
pub trait RecipientFilter: Send + Sync {
    /// Remove recipients who have blocked the sender.
    async fn filter_blocked(
        &self,
        from_uid: &UserId,
        uids: Vec<UserId>,
    ) -> Result<Vec<UserId>, CollaboratorError>;

    /// Run the notify hook chain. `None` vetoes delivery entirely.
    async fn fire_notify_hook(
        &self,
        payload: NotifyPayload,
    ) -> Result<Option<NotifyPayload>, CollaboratorError> {
        Ok(Some(payload))
    }
}

/// Realtime reachability.
#[async_trait]
pub trait PresenceOracle: Send + Sync {
    /// One flag per user, in the same order, `true` when the user has a live session.
    async fn is_reachable(&self, uids: &[UserId]) -> Result<Vec<bool>, CollaboratorError>;
}

/// Realtime delivery to connected sessions.
#[async_trait]
pub trait RealtimeBroadcaster: Send + Sync {
    /// Deliver an event to every session of a recipient.
    ///
    /// Delivery is best effort; users without sessions simply miss it.
    fn broadcast(&self, uid: &UserId, event: &ChatReceived);

    /// Push a fresh unread counter to the recipient.
    async fn refresh_unread(&self, uid: &UserId) -> Result<(), CollaboratorError>;
}

/// Durable notification storage.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Build a notification record from descriptor fields.
    async fn create(&self, fields: NotificationFields) -> Result<Notification, CollaboratorError>;

    /// Persist and deliver a record to each recipient.
    async fn push(
        &self,
        notification: &Notification,
        uids: &[UserId],
    ) -> Result<(), CollaboratorError>;
}

/// The full set of collaborators a dispatcher needs.
#[derive(Clone)]
pub struct Collaborators {
    /// Room membership.
    pub rooms: Arc<dyn RoomDirectory>,
    /// Block rules and notify hooks.
    pub filter: Arc<dyn RecipientFilter>,
    /// Reachability lookup.
    pub presence: Arc<dyn PresenceOracle>,
    /// Realtime delivery.
    pub broadcaster: Arc<dyn RealtimeBroadcaster>,
    /// Notification storage.
    pub store: Arc<dyn NotificationStore>,
}
