//! In-memory room directory.
//!
//! Tracks room membership, per-user block lists, the notify hook chain and
//! which rooms each user has unread messages in.

use crate::traits::{CollaboratorError, RecipientFilter, RoomDirectory};
use async_trait::async_trait;
use chime_protocol::{ChatMessage, NotifyPayload, RoomId, UserId};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Default maximum members per room.
pub const DEFAULT_MAX_ROOM_MEMBERS: usize = 100;

/// A notify hook. Returning `None` vetoes delivery.
pub type NotifyHook = Arc<dyn Fn(NotifyPayload) -> Option<NotifyPayload> + Send + Sync>;

/// Room errors.
#[derive(Debug, Error)]
pub enum RoomError {
    /// Room not found.
    #[error("Room not found: {0}")]
    NotFound(RoomId),

    /// Room already exists.
    #[error("Room already exists: {0}")]
    AlreadyExists(RoomId),

    /// Sender is not in the room.
    #[error("User {uid} is not a member of room {room}")]
    NotAMember {
        /// The user.
        uid: UserId,
        /// The room.
        room: RoomId,
    },

    /// Room is at its member limit.
    #[error("Room is full ({0} members)")]
    Full(usize),
}

struct Room {
    owner: UserId,
    members: Vec<UserId>,
}

/// In-memory rooms, blocks and unread state.
pub struct InMemoryRooms {
    rooms: DashMap<RoomId, Room>,
    /// blocker -> users they blocked
    blocks: DashMap<UserId, HashSet<UserId>>,
    unread: DashMap<UserId, HashSet<RoomId>>,
    hooks: Vec<NotifyHook>,
    next_mid: AtomicU64,
    max_members: usize,
}

impl InMemoryRooms {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_members(DEFAULT_MAX_ROOM_MEMBERS)
    }

    /// Create an empty directory with a member limit per room.
    #[must_use]
    pub fn with_max_members(max_members: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            blocks: DashMap::new(),
            unread: DashMap::new(),
            hooks: Vec::new(),
            next_mid: AtomicU64::new(1),
            max_members,
        }
    }

    /// Append a notify hook. Hooks run in registration order.
    #[must_use]
    pub fn with_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(NotifyPayload) -> Option<NotifyPayload> + Send + Sync + 'static,
    {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Create a room. The owner is always the first member.
    ///
    /// # Errors
    ///
    /// Returns an error if the room exists or has too many members.
    pub fn create_room(
        &self,
        room_id: impl Into<RoomId>,
        owner: impl Into<UserId>,
        members: impl IntoIterator<Item = UserId>,
    ) -> Result<(), RoomError> {
        let room_id = room_id.into();
        let owner = owner.into();

        let mut all = vec![owner.clone()];
        for uid in members {
            if !all.contains(&uid) {
                all.push(uid);
            }
        }
        if all.len() > self.max_members {
            return Err(RoomError::Full(self.max_members));
        }

        match self.rooms.entry(room_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(RoomError::AlreadyExists(room_id)),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                debug!(room = %room_id, owner = %owner, members = all.len(), "Room created");
                vacant.insert(Room {
                    owner,
                    members: all,
                });
                Ok(())
            }
        }
    }

    /// Add a member. Returns `false` if already a member.
    ///
    /// # Errors
    ///
    /// Returns an error if the room does not exist or is full.
    pub fn add_member(&self, room_id: &RoomId, uid: UserId) -> Result<bool, RoomError> {
        let mut room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| RoomError::NotFound(room_id.clone()))?;

        if room.members.contains(&uid) {
            return Ok(false);
        }
        if room.members.len() >= self.max_members {
            return Err(RoomError::Full(self.max_members));
        }

        room.members.push(uid);
        Ok(true)
    }

    /// Remove a member. Returns `false` if not a member.
    ///
    /// # Errors
    ///
    /// Returns an error if the room does not exist.
    pub fn remove_member(&self, room_id: &RoomId, uid: &UserId) -> Result<bool, RoomError> {
        let mut room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| RoomError::NotFound(room_id.clone()))?;

        let before = room.members.len();
        room.members.retain(|m| m != uid);
        Ok(room.members.len() != before)
    }

    /// Members of a room, owner first.
    #[must_use]
    pub fn members(&self, room_id: &RoomId) -> Option<Vec<UserId>> {
        self.rooms.get(room_id).map(|r| r.members.clone())
    }

    /// Owner of a room.
    #[must_use]
    pub fn owner(&self, room_id: &RoomId) -> Option<UserId> {
        self.rooms.get(room_id).map(|r| r.owner.clone())
    }

    /// `blocker` stops receiving messages from `blocked`.
    pub fn block(&self, blocker: &UserId, blocked: &UserId) {
        self.blocks
            .entry(blocker.clone())
            .or_default()
            .insert(blocked.clone());
    }

    /// Lift a block. Returns `false` if there was none.
    pub fn unblock(&self, blocker: &UserId, blocked: &UserId) -> bool {
        self.blocks
            .get_mut(blocker)
            .map(|mut set| set.remove(blocked))
            .unwrap_or(false)
    }

    /// Whether `blocker` has blocked `blocked`.
    #[must_use]
    pub fn is_blocked(&self, blocker: &UserId, blocked: &UserId) -> bool {
        self.blocks
            .get(blocker)
            .map(|set| set.contains(blocked))
            .unwrap_or(false)
    }

    /// Record a message in its room.
    ///
    /// Assigns the message ID and marks the room unread for every member
    /// except the sender.
    ///
    /// # Errors
    ///
    /// Returns an error if the room does not exist or a non-system message
    /// comes from a non-member.
    pub fn record_message(&self, message: ChatMessage) -> Result<ChatMessage, RoomError> {
        let room = self
            .rooms
            .get(&message.room_id)
            .ok_or_else(|| RoomError::NotFound(message.room_id.clone()))?;

        if !message.system && !room.members.contains(&message.from_uid) {
            return Err(RoomError::NotAMember {
                uid: message.from_uid.clone(),
                room: message.room_id.clone(),
            });
        }

        for uid in room.members.iter().filter(|m| **m != message.from_uid) {
            self.unread
                .entry(uid.clone())
                .or_default()
                .insert(message.room_id.clone());
        }

        let mid = self.next_mid.fetch_add(1, Ordering::Relaxed);
        Ok(message.with_mid(mid))
    }

    /// Mark a room read. Returns `false` if it was not unread.
    pub fn mark_read(&self, uid: &UserId, room_id: &RoomId) -> bool {
        self.unread
            .get_mut(uid)
            .map(|mut rooms| rooms.remove(room_id))
            .unwrap_or(false)
    }

    /// Number of rooms with unread messages.
    #[must_use]
    pub fn unread_count(&self, uid: &UserId) -> usize {
        self.unread.get(uid).map(|rooms| rooms.len()).unwrap_or(0)
    }
}

impl Default for InMemoryRooms {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoomDirectory for InMemoryRooms {
    async fn room_members(&self, room_id: &RoomId) -> Result<Vec<UserId>, CollaboratorError> {
        Ok(self.members(room_id).unwrap_or_default())
    }

    async fn is_group_room(&self, room_id: &RoomId) -> Result<bool, CollaboratorError> {
        Ok(self
            .rooms
            .get(room_id)
            .map(|r| r.members.len() > 2)
            .unwrap_or(false))
    }
}

#[async_trait]
impl RecipientFilter for InMemoryRooms {
    async fn filter_blocked(
        &self,
        from_uid: &UserId,
        uids: Vec<UserId>,
    ) -> Result<Vec<UserId>, CollaboratorError> {
        Ok(uids
            .into_iter()
            .filter(|uid| !self.is_blocked(uid, from_uid))
            .collect())
    }

    async fn fire_notify_hook(
        &self,
        payload: NotifyPayload,
    ) -> Result<Option<NotifyPayload>, CollaboratorError> {
        Ok(self
            .hooks
            .iter()
            .try_fold(payload, |payload, hook| hook(payload)))
    }
}
