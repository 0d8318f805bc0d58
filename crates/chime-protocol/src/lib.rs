//! # chime-protocol
//!
//! Message model and wire formats for the Chime chat notification service.
//!
//! This crate defines everything that crosses a process boundary:
//!
//! - `ChatMessage` / `Author` - the recorded chat message
//! - `ChatReceived` - the realtime `event:chats.receive` payload
//! - `NotificationFields` / `Notification` - the durable notification schema
//! - `Frame` + `codec` - the binary session protocol
//!
//! ## Example
//!
//! ```rust
//! use chime_protocol::{codec, Frame};
//!
//! let frame = Frame::send(1, "room-1", "Hello, world!");
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod events;
pub mod frames;
pub mod ids;
pub mod message;

pub use codec::{decode, encode, ProtocolError};
pub use events::{
    chat_nid, ChatReceived, Notification, NotificationFields, NotificationType, NotifyPayload,
    CHAT_RECEIVE_EVENT,
};
pub use frames::{Frame, FrameType, PROTOCOL_VERSION};
pub use ids::{RoomId, UserId};
pub use message::{now_millis, Author, ChatMessage};
