//! # chime-core
//!
//! Debounced multi-recipient notification dispatch for the Chime chat service.
//!
//! This crate provides:
//!
//! - **Dispatcher** - immediate realtime fan-out plus debounced notifications
//! - **DebounceQueue** - per-(sender, room) coalescing windows with cancellable timers
//! - **Collaborator traits** - presence, membership, filtering, delivery and storage
//! - **In-memory collaborators** - sessions, rooms and a notification store
//!
//! ## Architecture
//!
//! ```text
//!                 ┌───────────────┐  broadcast  ┌───────────────────┐
//!   message ────▶ │  Dispatcher   │───────────▶ │  SessionRegistry  │
//!                 └───────────────┘             └───────────────────┘
//!                         │ enqueue                       ▲
//!                         ▼                               │ presence
//!                 ┌───────────────┐    flush    ┌───────────────────┐
//!                 │ DebounceQueue │───────────▶ │ NotificationStore │
//!                 └───────────────┘             └───────────────────┘
//! ```

pub mod dispatcher;
pub mod notifications;
pub mod presence;
pub mod queue;
pub mod rooms;
pub mod scheduler;
pub mod traits;

pub use dispatcher::{
    DispatchError, DispatchOutcome, Dispatcher, DispatcherConfig, FlushOutcome,
    DEFAULT_NOTIFICATION_SEND_DELAY,
};
pub use notifications::InMemoryNotificationStore;
pub use presence::{SessionId, SessionRegistry, SessionState, SessionStats};
pub use queue::{DebounceKey, DebounceQueue, FlushTicket, PendingWindow};
pub use rooms::{InMemoryRooms, NotifyHook, RoomError};
pub use scheduler::{schedule, TimerHandle};
pub use traits::{
    CollaboratorError, Collaborators, NotificationStore, PresenceOracle, RealtimeBroadcaster,
    RecipientFilter, RoomDirectory,
};
