//! Chat message model.
//!
//! Messages are recorded by the room before they reach the dispatcher, so
//! every message carries its room, its author and a creation timestamp.

use crate::ids::{RoomId, UserId};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Public profile of a message author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Author user ID.
    pub uid: UserId,
    /// Login name.
    pub username: String,
    /// Name shown in notifications.
    pub displayname: String,
}

impl Author {
    /// Create an author whose display name equals the username.
    #[must_use]
    pub fn new(uid: impl Into<UserId>, username: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            uid: uid.into(),
            displayname: username.clone(),
            username,
        }
    }

    /// Override the display name.
    #[must_use]
    pub fn with_displayname(mut self, displayname: impl Into<String>) -> Self {
        self.displayname = displayname.into();
        self
    }
}

/// A chat message sent into a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Message ID assigned by the room, if recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<u64>,
    /// Message body.
    pub content: String,
    /// Sender user ID.
    #[serde(rename = "fromuid")]
    pub from_uid: UserId,
    /// Room the message was sent to.
    pub room_id: RoomId,
    /// Sender profile.
    pub from_user: Author,
    /// System messages (joins, leaves, renames) are broadcast but never notified.
    #[serde(default)]
    pub system: bool,
    /// Creation time in milliseconds since the epoch.
    pub timestamp: u64,
}

impl ChatMessage {
    /// Create a new chat message.
    #[must_use]
    pub fn new(room_id: impl Into<RoomId>, from_user: Author, content: impl Into<String>) -> Self {
        Self {
            mid: None,
            content: content.into(),
            from_uid: from_user.uid.clone(),
            room_id: room_id.into(),
            from_user,
            system: false,
            timestamp: now_millis(),
        }
    }

    /// Mark the message as a system message.
    #[must_use]
    pub fn as_system(mut self) -> Self {
        self.system = true;
        self
    }

    /// Set the room-assigned message ID.
    #[must_use]
    pub fn with_mid(mut self, mid: u64) -> Self {
        self.mid = Some(mid);
        self
    }

    /// Display name of the sender.
    #[must_use]
    pub fn displayname(&self) -> &str {
        &self.from_user.displayname
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_wire_names() {
        let author = Author::new("1", "alice").with_displayname("Alice");
        let mut msg = ChatMessage::new("r1", author, "hi").with_mid(7);
        msg.timestamp = 1000;

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "mid": 7,
                "content": "hi",
                "fromuid": "1",
                "roomId": "r1",
                "fromUser": {"uid": "1", "username": "alice", "displayname": "Alice"},
                "system": false,
                "timestamp": 1000
            })
        );
    }

    #[test]
    fn test_system_flag_defaults_to_false() {
        let msg: ChatMessage = serde_json::from_value(json!({
            "content": "hello",
            "fromuid": "2",
            "roomId": "r9",
            "fromUser": {"uid": "2", "username": "bob", "displayname": "Bob"},
            "timestamp": 5
        }))
        .unwrap();

        assert!(!msg.system);
        assert!(msg.mid.is_none());
        assert_eq!(msg.displayname(), "Bob");
    }
}
