//! Session tracking for Chime.
//!
//! A user is reachable while at least one realtime session is open. Every
//! user has one broadcast channel shared by all of their sessions, so a frame
//! sent to a user reaches each of their connected devices.
//!
//! Each session also owns a close signal. Pruning a session fires it, so the
//! socket serving that session can stop even while the user's other sessions
//! keep the shared channel alive.

use crate::traits::{CollaboratorError, PresenceOracle};
use async_trait::async_trait;
use chime_protocol::{now_millis, Frame, UserId};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tracing::debug;

/// Default per-user broadcast capacity.
const DEFAULT_SESSION_CAPACITY: usize = 256;

/// A session identifier.
pub type SessionId = String;

/// State of a single realtime session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    /// Session ID.
    pub session_id: SessionId,
    /// User owning the session.
    pub uid: UserId,
    /// When the session connected.
    pub connected_at: u64,
    /// Last activity timestamp.
    pub last_seen: u64,
}

impl SessionState {
    /// Create a new session state.
    #[must_use]
    pub fn new(uid: UserId, session_id: impl Into<SessionId>) -> Self {
        let now = now_millis();
        Self {
            session_id: session_id.into(),
            uid,
            connected_at: now,
            last_seen: now,
        }
    }

    /// Update the last seen timestamp.
    pub fn touch(&mut self) {
        self.last_seen = now_millis();
    }

    /// Check if this session is stale (no activity for the given duration).
    #[must_use]
    pub fn is_stale(&self, timeout: Duration) -> bool {
        now_millis().saturating_sub(self.last_seen) > timeout.as_millis() as u64
    }
}

struct SessionEntry {
    state: SessionState,
    closed: Arc<Notify>,
}

struct UserSessions {
    sessions: HashMap<SessionId, SessionEntry>,
    sender: broadcast::Sender<Arc<Frame>>,
}

impl UserSessions {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sessions: HashMap::new(),
            sender,
        }
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    /// Users with at least one session.
    pub online_users: usize,
    /// Total open sessions.
    pub sessions: usize,
}

/// Registry of open realtime sessions, keyed by user.
pub struct SessionRegistry {
    users: DashMap<UserId, UserSessions>,
    capacity: usize,
}

impl SessionRegistry {
    /// Create a new registry.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SESSION_CAPACITY)
    }

    /// Create a registry with a specific per-user broadcast capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            users: DashMap::new(),
            capacity,
        }
    }

    /// Open a session for a user.
    ///
    /// Returns a receiver for every frame sent to the user.
    pub fn connect(
        &self,
        uid: &UserId,
        session_id: impl Into<SessionId>,
    ) -> broadcast::Receiver<Arc<Frame>> {
        let session_id = session_id.into();
        let mut entry = self
            .users
            .entry(uid.clone())
            .or_insert_with(|| UserSessions::new(self.capacity));

        entry.sessions.insert(
            session_id.clone(),
            SessionEntry {
                state: SessionState::new(uid.clone(), session_id.clone()),
                closed: Arc::new(Notify::new()),
            },
        );
        debug!(uid = %uid, session = %session_id, sessions = entry.sessions.len(), "Session connected");

        entry.sender.subscribe()
    }

    /// Close a session.
    ///
    /// The user goes offline when their last session closes.
    pub fn disconnect(&self, uid: &UserId, session_id: &str) -> Option<SessionState> {
        let mut entry = self.users.get_mut(uid)?;
        let state = entry.sessions.remove(session_id).map(|e| e.state);

        if state.is_some() {
            debug!(uid = %uid, session = %session_id, "Session disconnected");
        }

        if entry.sessions.is_empty() {
            drop(entry); // Release the lock
            self.users.remove_if(uid, |_, e| e.sessions.is_empty());
            debug!(uid = %uid, "User offline");
        }

        state
    }

    /// Touch a session's last seen timestamp.
    pub fn touch(&self, uid: &UserId, session_id: &str) {
        if let Some(mut entry) = self.users.get_mut(uid) {
            if let Some(session) = entry.sessions.get_mut(session_id) {
                session.state.touch();
            }
        }
    }

    /// Signal fired when the registry drops a session on its own.
    ///
    /// A permit is stored, so waiting after the session was pruned still
    /// completes.
    #[must_use]
    pub fn close_signal(&self, uid: &UserId, session_id: &str) -> Option<Arc<Notify>> {
        self.users
            .get(uid)
            .and_then(|e| e.sessions.get(session_id).map(|s| Arc::clone(&s.closed)))
    }

    /// Check if a user has any open session.
    #[must_use]
    pub fn is_online(&self, uid: &UserId) -> bool {
        self.users
            .get(uid)
            .map(|e| !e.sessions.is_empty())
            .unwrap_or(false)
    }

    /// Number of open sessions for a user.
    #[must_use]
    pub fn session_count(&self, uid: &UserId) -> usize {
        self.users.get(uid).map(|e| e.sessions.len()).unwrap_or(0)
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            online_users: self.users.len(),
            sessions: self.users.iter().map(|e| e.sessions.len()).sum(),
        }
    }

    /// Send a frame to every session of a user.
    ///
    /// Returns the number of sessions that received it.
    pub fn send(&self, uid: &UserId, frame: Frame) -> usize {
        self.users
            .get(uid)
            .map(|e| e.sender.send(Arc::new(frame)).unwrap_or_default())
            .unwrap_or(0)
    }

    /// Remove sessions with no activity for the given duration.
    ///
    /// Returns the removed sessions.
    pub fn prune_stale(&self, timeout: Duration) -> Vec<SessionState> {
        let mut pruned = Vec::new();

        self.users.retain(|uid, entry| {
            entry.sessions.retain(|_, session| {
                if session.state.is_stale(timeout) {
                    debug!(uid = %uid, session = %session.state.session_id, "Pruned stale session");
                    session.closed.notify_one();
                    pruned.push(session.state.clone());
                    false
                } else {
                    true
                }
            });
            !entry.sessions.is_empty()
        });

        pruned
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PresenceOracle for SessionRegistry {
    async fn is_reachable(&self, uids: &[UserId]) -> Result<Vec<bool>, CollaboratorError> {
        Ok(uids.iter().map(|uid| self.is_online(uid)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(id: &str) -> UserId {
        UserId::from(id)
    }

    #[test]
    fn test_connect_disconnect() {
        let registry = SessionRegistry::new();

        let _rx = registry.connect(&uid("u1"), "s-1");
        let _rx2 = registry.connect(&uid("u1"), "s-2");
        assert!(registry.is_online(&uid("u1")));
        assert_eq!(registry.session_count(&uid("u1")), 2);

        assert!(registry.disconnect(&uid("u1"), "s-1").is_some());
        assert!(registry.is_online(&uid("u1")));

        assert!(registry.disconnect(&uid("u1"), "s-2").is_some());
        assert!(!registry.is_online(&uid("u1")));
        assert_eq!(registry.stats().online_users, 0);

        // Already gone
        assert!(registry.disconnect(&uid("u1"), "s-2").is_none());
    }

    #[tokio::test]
    async fn test_send_reaches_every_session() {
        let registry = SessionRegistry::new();
        let mut rx1 = registry.connect(&uid("u1"), "s-1");
        let mut rx2 = registry.connect(&uid("u1"), "s-2");

        assert_eq!(registry.send(&uid("u1"), Frame::UnreadCount { count: 3 }), 2);
        assert_eq!(registry.send(&uid("nobody"), Frame::ping()), 0);

        assert_eq!(*rx1.recv().await.unwrap(), Frame::UnreadCount { count: 3 });
        assert_eq!(*rx2.recv().await.unwrap(), Frame::UnreadCount { count: 3 });
    }

    #[tokio::test]
    async fn test_reachability_flags_follow_input_order() {
        let registry = SessionRegistry::new();
        let _rx = registry.connect(&uid("u2"), "s-1");

        let flags = registry
            .is_reachable(&[uid("u1"), uid("u2"), uid("u3")])
            .await
            .unwrap();
        assert_eq!(flags, vec![false, true, false]);
    }

    #[test]
    fn test_prune_stale() {
        let registry = SessionRegistry::new();
        let _rx = registry.connect(&uid("u1"), "s-1");

        assert!(registry.prune_stale(Duration::from_secs(60)).is_empty());

        std::thread::sleep(Duration::from_millis(5));
        let pruned = registry.prune_stale(Duration::ZERO);
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].session_id, "s-1");
        assert!(!registry.is_online(&uid("u1")));
    }

    #[test]
    fn test_stats() {
        let registry = SessionRegistry::new();
        let _a = registry.connect(&uid("u1"), "s-1");
        let _b = registry.connect(&uid("u1"), "s-2");
        let _c = registry.connect(&uid("u2"), "s-3");

        let stats = registry.stats();
        assert_eq!(stats.online_users, 2);
        assert_eq!(stats.sessions, 3);
    }

    #[tokio::test]
    async fn test_prune_signals_only_the_stale_session() {
        let registry = SessionRegistry::new();
        let _a = registry.connect(&uid("u1"), "s-1");
        let _b = registry.connect(&uid("u1"), "s-2");
        let stale = registry.close_signal(&uid("u1"), "s-1").unwrap();
        let live = registry.close_signal(&uid("u1"), "s-2").unwrap();

        std::thread::sleep(Duration::from_millis(30));
        registry.touch(&uid("u1"), "s-2");
        let pruned = registry.prune_stale(Duration::from_millis(15));

        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].session_id, "s-1");
        assert!(registry.is_online(&uid("u1")));
        assert!(registry.close_signal(&uid("u1"), "s-1").is_none());

        let wait = Duration::from_millis(50);
        assert!(tokio::time::timeout(wait, stale.notified()).await.is_ok());
        assert!(tokio::time::timeout(wait, live.notified()).await.is_err());
    }
}
