//! Per-(sender, room) debounce queue.
//!
//! Each key owns at most one pending window. New activity for a key appends
//! to the window's content and restarts its timer, so a burst of messages
//! produces a single flush `delay` after the last message.
//!
//! Every (re)arm gets a fresh generation number carried by the timer's
//! [`FlushTicket`]. A fired timer only takes the window if the generation
//! still matches, so a superseded timer can never flush a newer window.

use crate::scheduler::{schedule, TimerHandle};
use chime_protocol::{ChatMessage, RoomId, UserId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

/// Identifies one coalescing window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DebounceKey {
    /// Sender user ID.
    pub sender: UserId,
    /// Room ID.
    pub room: RoomId,
}

impl DebounceKey {
    /// Create a new key.
    #[must_use]
    pub fn new(sender: impl Into<UserId>, room: impl Into<RoomId>) -> Self {
        Self {
            sender: sender.into(),
            room: room.into(),
        }
    }
}

impl fmt::Display for DebounceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.sender, self.room)
    }
}

/// Snapshot of a pending window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWindow {
    /// Latest message metadata with the content of every message in the window.
    pub message: ChatMessage,
    /// Recipients of the latest message.
    pub recipients: Vec<UserId>,
    /// Number of messages merged into this window.
    pub coalesced: usize,
    generation: u64,
}

impl PendingWindow {
    fn open(message: ChatMessage, recipients: Vec<UserId>, generation: u64) -> Self {
        Self {
            message,
            recipients,
            coalesced: 1,
            generation,
        }
    }

    /// Merge the next message: its metadata wins, its content is appended.
    fn absorb(&mut self, mut message: ChatMessage, recipients: Vec<UserId>, generation: u64) {
        let mut content = std::mem::take(&mut self.message.content);
        content.push('\n');
        content.push_str(&message.content);
        message.content = content;

        self.message = message;
        self.recipients = recipients;
        self.coalesced += 1;
        self.generation = generation;
    }
}

/// Token handed to a timer when it is armed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushTicket {
    /// Window the timer belongs to.
    pub key: DebounceKey,
    generation: u64,
}

struct PendingEntry {
    window: PendingWindow,
    timer: TimerHandle,
}

/// Keyed map of pending windows and their timers.
pub struct DebounceQueue {
    entries: DashMap<DebounceKey, PendingEntry>,
    delay: Duration,
    generation: AtomicU64,
}

impl DebounceQueue {
    /// Create a queue whose windows flush `delay` after their last message.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            delay,
            generation: AtomicU64::new(0),
        }
    }

    /// The debounce delay.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Number of pending windows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no window is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a window is pending for `key`.
    #[must_use]
    pub fn contains(&self, key: &DebounceKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Snapshot of the pending window for `key`.
    #[must_use]
    pub fn pending(&self, key: &DebounceKey) -> Option<PendingWindow> {
        self.entries.get(key).map(|e| e.window.clone())
    }

    /// Add a message to the window for `key` and (re)arm its timer.
    ///
    /// `on_fire` builds the task to run when the timer fires; it receives the
    /// ticket to pass to [`DebounceQueue::take_current`]. Returns the number of
    /// messages now merged in the window.
    ///
    /// Must be called within a tokio runtime.
    pub fn enqueue<F, Fut>(
        &self,
        key: DebounceKey,
        message: ChatMessage,
        recipients: Vec<UserId>,
        on_fire: F,
    ) -> usize
    where
        F: FnOnce(FlushTicket) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let ticket = FlushTicket {
            key: key.clone(),
            generation,
        };

        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.timer.cancel();
                entry.window.absorb(message, recipients, generation);
                entry.timer = schedule(self.delay, on_fire(ticket));
                let coalesced = entry.window.coalesced;
                trace!(key = %occupied.key(), coalesced, "Window extended");
                coalesced
            }
            Entry::Vacant(vacant) => {
                trace!(key = %vacant.key(), "Window opened");
                vacant.insert(PendingEntry {
                    window: PendingWindow::open(message, recipients, generation),
                    timer: schedule(self.delay, on_fire(ticket)),
                });
                1
            }
        }
    }

    /// Remove the window a fired timer was armed for.
    ///
    /// Returns `None` if the window was already taken or has since been
    /// re-armed. The timer is not cancelled: the caller is that timer.
    pub fn take_current(&self, ticket: &FlushTicket) -> Option<PendingWindow> {
        self.entries
            .remove_if(&ticket.key, |_, e| e.window.generation == ticket.generation)
            .map(|(_, e)| e.window)
    }

    /// Remove the window for `key` and cancel its timer.
    pub fn take(&self, key: &DebounceKey) -> Option<PendingWindow> {
        self.entries.remove(key).map(|(_, e)| {
            e.timer.cancel();
            e.window
        })
    }

    /// Drop every pending window and cancel its timer.
    ///
    /// Returns the number of windows dropped.
    pub fn clear(&self) -> usize {
        let mut dropped = 0;
        self.entries.retain(|_, e| {
            e.timer.cancel();
            dropped += 1;
            false
        });
        dropped
    }
}

impl fmt::Debug for DebounceQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebounceQueue")
            .field("pending", &self.entries.len())
            .field("delay", &self.delay)
            .finish()
    }
}
