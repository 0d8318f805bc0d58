//! Frame types for the Chime client protocol.
//!
//! Frames are the unit of communication on a realtime session.
//! Each frame is serialized using MessagePack for efficient binary encoding.

use crate::events::ChatReceived;
use crate::ids::{RoomId, UserId};
use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Send = 0x01,
    MarkRead = 0x02,
    ChatReceive = 0x03,
    UnreadCount = 0x04,
    Ack = 0x05,
    Error = 0x06,
    Ping = 0x07,
    Pong = 0x08,
    Connected = 0x0A,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Send),
            0x02 => Ok(FrameType::MarkRead),
            0x03 => Ok(FrameType::ChatReceive),
            0x04 => Ok(FrameType::UnreadCount),
            0x05 => Ok(FrameType::Ack),
            0x06 => Ok(FrameType::Error),
            0x07 => Ok(FrameType::Ping),
            0x08 => Ok(FrameType::Pong),
            0x0A => Ok(FrameType::Connected),
            _ => Err("Invalid frame type"),
        }
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Client sends a chat message into a room.
    #[serde(rename = "send", rename_all = "camelCase")]
    Send {
        /// Request ID for acknowledgment.
        id: u64,
        /// Target room.
        room_id: RoomId,
        /// Message body.
        content: String,
    },

    /// Client has read a room.
    #[serde(rename = "markRead", rename_all = "camelCase")]
    MarkRead {
        /// Request ID for acknowledgment.
        id: u64,
        /// Room that was read.
        room_id: RoomId,
    },

    /// A chat message arrived in one of the user's rooms.
    #[serde(rename = "event:chats.receive")]
    ChatReceive(ChatReceived),

    /// Number of rooms with unread messages.
    #[serde(rename = "unreadCount")]
    UnreadCount {
        /// Unread room count.
        count: usize,
    },

    /// Acknowledgment of a request.
    #[serde(rename = "ack")]
    Ack {
        /// ID of the acknowledged request.
        id: u64,
    },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// ID of the failed request (0 if not applicable).
        id: u64,
        /// Error code.
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        /// Optional timestamp.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from ping.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Session established response.
    #[serde(rename = "connected", rename_all = "camelCase")]
    Connected {
        /// Unique session identifier.
        session_id: String,
        /// Authenticated user.
        uid: UserId,
        /// Protocol version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Send { .. } => FrameType::Send,
            Frame::MarkRead { .. } => FrameType::MarkRead,
            Frame::ChatReceive(_) => FrameType::ChatReceive,
            Frame::UnreadCount { .. } => FrameType::UnreadCount,
            Frame::Ack { .. } => FrameType::Ack,
            Frame::Error { .. } => FrameType::Error,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
            Frame::Connected { .. } => FrameType::Connected,
        }
    }

    /// Create a new Send frame.
    #[must_use]
    pub fn send(id: u64, room_id: impl Into<RoomId>, content: impl Into<String>) -> Self {
        Frame::Send {
            id,
            room_id: room_id.into(),
            content: content.into(),
        }
    }

    /// Create a new MarkRead frame.
    #[must_use]
    pub fn mark_read(id: u64, room_id: impl Into<RoomId>) -> Self {
        Frame::MarkRead {
            id,
            room_id: room_id.into(),
        }
    }

    /// Create a new Ack frame.
    #[must_use]
    pub fn ack(id: u64) -> Self {
        Frame::Ack { id }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(session_id: impl Into<String>, uid: impl Into<UserId>, heartbeat: u32) -> Self {
        Frame::Connected {
            session_id: session_id.into(),
            uid: uid.into(),
            version: PROTOCOL_VERSION,
            heartbeat,
        }
    }
}
