//! Chat message dispatcher.
//!
//! Every incoming message is broadcast immediately to all recipients. Non-system
//! messages also enter the debounce queue; when a window's timer fires, the
//! dispatcher re-checks presence and creates one notification for the
//! recipients that are still unreachable.

use crate::queue::{DebounceKey, DebounceQueue, FlushTicket, PendingWindow};
use crate::traits::{CollaboratorError, Collaborators};
use chime_protocol::{ChatMessage, NotificationFields, NotifyPayload, RoomId, UserId};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Default delay between the last message of a burst and its notification.
pub const DEFAULT_NOTIFICATION_SEND_DELAY: Duration = Duration::from_secs(60);

/// Dispatch errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Message does not match the room or sender it was dispatched for.
    #[error("Invalid message: {0}")]
    InvalidMessage(&'static str),

    /// Membership, block or hook lookup failed.
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Debounce window length.
    pub notification_send_delay: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            notification_send_delay: DEFAULT_NOTIFICATION_SEND_DELAY,
        }
    }
}

/// What [`Dispatcher::handle_message`] did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No recipients survived filtering; nothing was sent.
    Vetoed,
    /// System message, broadcast only.
    Broadcast {
        /// Number of recipients the event was broadcast to.
        recipients: usize,
    },
    /// Broadcast and added to a debounce window.
    Queued {
        /// Number of recipients the event was broadcast to.
        recipients: usize,
        /// Messages now merged in the window.
        coalesced: usize,
    },
}

/// Result of flushing a debounce window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// No window was pending.
    NotPending,
    /// Every recipient was reachable or was the sender.
    AllReachable,
    /// A notification was pushed to these recipients.
    Notified {
        /// Unreachable recipients that got the notification.
        recipients: Vec<UserId>,
    },
    /// A collaborator failed; the window is gone and the error was logged.
    Failed,
}

struct Inner {
    queue: DebounceQueue,
    services: Collaborators,
}

/// Debounced multi-recipient notification dispatcher.
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Create a new dispatcher.
    #[must_use]
    pub fn new(config: DispatcherConfig, services: Collaborators) -> Self {
        info!(delay = ?config.notification_send_delay, "Creating dispatcher");
        Self {
            inner: Arc::new(Inner {
                queue: DebounceQueue::new(config.notification_send_delay),
                services,
            }),
        }
    }

    /// The debounce queue.
    #[must_use]
    pub fn queue(&self) -> &DebounceQueue {
        &self.inner.queue
    }

    /// Fan a recorded message out to the room and schedule its notification.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the message does not match `from_uid`/`room_id`, or
    /// if membership, block or hook lookup fails. Nothing is sent in that case.
    pub async fn handle_message(
        &self,
        from_uid: &UserId,
        room_id: &RoomId,
        message: ChatMessage,
    ) -> Result<DispatchOutcome, DispatchError> {
        validate_message(from_uid, room_id, &message)?;
        let services = &self.inner.services;

        let members = services.rooms.room_members(room_id).await?;
        let uids = services.filter.filter_blocked(from_uid, members).await?;
        let payload = NotifyPayload {
            room_id: room_id.clone(),
            from_uid: from_uid.clone(),
            message: message.clone(),
            uids,
        };

        let payload = match services.filter.fire_notify_hook(payload).await? {
            Some(payload) if !payload.uids.is_empty() => payload,
            _ => {
                debug!(sender = %from_uid, room = %room_id, "Delivery vetoed");
                return Ok(DispatchOutcome::Vetoed);
            }
        };

        for uid in &payload.uids {
            self.spawn_unread_refresh(uid.clone());
            services
                .broadcaster
                .broadcast(uid, &payload.receive_event_for(uid));
        }
        let recipients = payload.uids.len();

        if message.system {
            trace!(sender = %from_uid, room = %room_id, recipients, "System message broadcast");
            return Ok(DispatchOutcome::Broadcast { recipients });
        }

        let key = DebounceKey::new(from_uid.clone(), room_id.clone());
        let dispatcher = self.clone();
        let coalesced = self
            .inner
            .queue
            .enqueue(key, message, payload.uids, move |ticket| async move {
                dispatcher.flush_fired(ticket).await;
            });

        debug!(sender = %from_uid, room = %room_id, recipients, coalesced, "Message dispatched");
        Ok(DispatchOutcome::Queued {
            recipients,
            coalesced,
        })
    }

    /// Flush the window for a sender and room now.
    ///
    /// A no-op returning [`FlushOutcome::NotPending`] if nothing is pending.
    pub async fn flush(&self, from_uid: &UserId, room_id: &RoomId) -> FlushOutcome {
        let key = DebounceKey::new(from_uid.clone(), room_id.clone());
        match self.inner.queue.take(&key) {
            Some(window) => self.deliver(&key, window).await,
            None => FlushOutcome::NotPending,
        }
    }

    /// Drop every pending window without notifying.
    ///
    /// Returns the number of windows dropped.
    pub fn shutdown(&self) -> usize {
        let dropped = self.inner.queue.clear();
        if dropped > 0 {
            warn!(dropped, "Dropped pending notification windows");
        }
        dropped
    }

    async fn flush_fired(&self, ticket: FlushTicket) {
        // The window is removed before any I/O, so a message arriving during
        // delivery opens a new window.
        match self.inner.queue.take_current(&ticket) {
            Some(window) => {
                self.deliver(&ticket.key, window).await;
            }
            None => trace!(key = %ticket.key, "Timer fired for a window that is gone"),
        }
    }

    async fn deliver(&self, key: &DebounceKey, window: PendingWindow) -> FlushOutcome {
        match self.notify_unreachable(key, window).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(key = %key, error = %e, "Unable to send chat notification");
                FlushOutcome::Failed
            }
        }
    }

    async fn notify_unreachable(
        &self,
        key: &DebounceKey,
        window: PendingWindow,
    ) -> Result<FlushOutcome, CollaboratorError> {
        let services = &self.inner.services;
        let PendingWindow {
            message,
            recipients,
            coalesced,
            ..
        } = window;

        let reachable = services.presence.is_reachable(&recipients).await?;
        if reachable.len() != recipients.len() {
            return Err(CollaboratorError::ReachabilityMismatch {
                expected: recipients.len(),
                actual: reachable.len(),
            });
        }

        let offline: Vec<UserId> = recipients
            .into_iter()
            .zip(reachable)
            .filter(|(uid, online)| !online && *uid != key.sender)
            .map(|(uid, _)| uid)
            .collect();

        if offline.is_empty() {
            debug!(key = %key, "All recipients reachable, no notification");
            return Ok(FlushOutcome::AllReachable);
        }

        let is_group = services.rooms.is_group_room(&key.room).await?;
        let fields = NotificationFields::chat(&key.sender, &key.room, &message, is_group);
        let notification = services.store.create(fields).await?;
        services.store.push(&notification, &offline).await?;

        info!(
            key = %key,
            nid = %notification.nid(),
            recipients = offline.len(),
            coalesced,
            "Chat notification sent"
        );
        Ok(FlushOutcome::Notified { recipients: offline })
    }

    fn spawn_unread_refresh(&self, uid: UserId) {
        let broadcaster = Arc::clone(&self.inner.services.broadcaster);
        tokio::spawn(async move {
            if let Err(e) = broadcaster.refresh_unread(&uid).await {
                debug!(uid = %uid, error = %e, "Unread count refresh failed");
            }
        });
    }
}

/// Check that a message belongs to the sender and room it is dispatched for.
fn validate_message(
    from_uid: &UserId,
    room_id: &RoomId,
    message: &ChatMessage,
) -> Result<(), DispatchError> {
    if message.room_id != *room_id {
        return Err(DispatchError::InvalidMessage("message belongs to another room"));
    }
    if message.from_uid != *from_uid {
        return Err(DispatchError::InvalidMessage("sender does not match message author"));
    }
    Ok(())
}
