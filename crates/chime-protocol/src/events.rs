//! Externally consumed payloads.
//!
//! Two shapes leave the dispatcher and are read by other systems:
//!
//! - [`ChatReceived`] - the realtime `event:chats.receive` payload sent to every
//!   recipient session as soon as a message arrives.
//! - [`NotificationFields`] - the descriptor handed to the notification store
//!   when a debounce window flushes.

use crate::ids::{RoomId, UserId};
use crate::message::{now_millis, ChatMessage};
use serde::{Deserialize, Serialize};

/// Realtime event name for incoming chat messages.
pub const CHAT_RECEIVE_EVENT: &str = "event:chats.receive";

/// Payload passed through the notify hook chain.
///
/// Hooks may rewrite any field; an empty `uids` list vetoes delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyPayload {
    /// Room the message was sent to.
    pub room_id: RoomId,
    /// Sender user ID.
    pub from_uid: UserId,
    /// The message as recorded by the room.
    pub message: ChatMessage,
    /// Final recipient set.
    pub uids: Vec<UserId>,
}

impl NotifyPayload {
    /// Build the realtime event for a single recipient.
    #[must_use]
    pub fn receive_event_for(&self, recipient: &UserId) -> ChatReceived {
        ChatReceived {
            room_id: self.room_id.clone(),
            from_uid: self.from_uid.clone(),
            message: self.message.clone(),
            uids: self.uids.clone(),
            self_flag: u8::from(recipient == &self.from_uid),
        }
    }
}

/// Realtime payload delivered to each recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReceived {
    /// Room the message was sent to.
    pub room_id: RoomId,
    /// Sender user ID.
    pub from_uid: UserId,
    /// The message.
    pub message: ChatMessage,
    /// Every recipient of this message.
    pub uids: Vec<UserId>,
    /// `1` when the receiving user is the sender, `0` otherwise.
    #[serde(rename = "self")]
    pub self_flag: u8,
}

/// Notification type, chosen by room cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationType {
    /// One-to-one room.
    #[serde(rename = "new-chat")]
    NewChat,
    /// Room with more than two members.
    #[serde(rename = "new-group-chat")]
    NewGroupChat,
}

impl NotificationType {
    /// Pick the type for a room.
    #[must_use]
    pub fn for_room(is_group: bool) -> Self {
        if is_group {
            NotificationType::NewGroupChat
        } else {
            NotificationType::NewChat
        }
    }
}

/// Descriptor of a chat notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationFields {
    /// Notification type.
    #[serde(rename = "type")]
    pub kind: NotificationType,
    /// Email subject template.
    pub subject: String,
    /// Short body template.
    pub body_short: String,
    /// Full body (merged message content).
    pub body_long: String,
    /// Stable notification ID, one per sender and room.
    pub nid: String,
    /// Sender user ID.
    pub from: UserId,
    /// Link to the room.
    pub path: String,
}

impl NotificationFields {
    /// Build the descriptor for a flushed chat window.
    #[must_use]
    pub fn chat(from_uid: &UserId, room_id: &RoomId, message: &ChatMessage, is_group: bool) -> Self {
        let displayname = message.displayname();
        Self {
            kind: NotificationType::for_room(is_group),
            subject: format!("[[email:notif.chat.subject, {displayname}]]"),
            body_short: format!("[[notifications:new_message_from, {displayname}]]"),
            body_long: message.content.clone(),
            nid: chat_nid(from_uid, room_id),
            from: from_uid.clone(),
            path: format!("/chats/{}", message.room_id),
        }
    }
}

/// Notification ID shared by every window of one sender in one room.
#[must_use]
pub fn chat_nid(from_uid: &UserId, room_id: &RoomId) -> String {
    format!("chat_{from_uid}_{room_id}")
}

/// A durable notification record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Descriptor fields.
    #[serde(flatten)]
    pub fields: NotificationFields,
    /// Creation time in milliseconds since the epoch.
    pub datetime: u64,
}

impl Notification {
    /// Create a record stamped with the current time.
    #[must_use]
    pub fn new(fields: NotificationFields) -> Self {
        Self {
            fields,
            datetime: now_millis(),
        }
    }

    /// The notification ID.
    #[must_use]
    pub fn nid(&self) -> &str {
        &self.fields.nid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Author;
    use serde_json::json;

    fn message(content: &str) -> ChatMessage {
        let mut msg = ChatMessage::new("r1", Author::new("u1", "ann").with_displayname("Ann"), content);
        msg.timestamp = 10;
        msg
    }

    #[test]
    fn test_self_flag_per_recipient() {
        let payload = NotifyPayload {
            room_id: "r1".into(),
            from_uid: "u1".into(),
            message: message("hi"),
            uids: vec!["u1".into(), "u2".into()],
        };

        assert_eq!(payload.receive_event_for(&"u1".into()).self_flag, 1);
        assert_eq!(payload.receive_event_for(&"u2".into()).self_flag, 0);
    }

    #[test]
    fn test_chat_received_shape() {
        let payload = NotifyPayload {
            room_id: "r1".into(),
            from_uid: "u1".into(),
            message: message("hi"),
            uids: vec!["u2".into()],
        };
        let value = serde_json::to_value(payload.receive_event_for(&"u2".into())).unwrap();

        let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, ["fromUid", "message", "roomId", "self", "uids"]);
        assert_eq!(value["self"], json!(0));
    }

    #[test]
    fn test_notification_fields() {
        let fields = NotificationFields::chat(&"u1".into(), &"r1".into(), &message("hi\nthere"), false);

        let value = serde_json::to_value(&fields).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "new-chat",
                "subject": "[[email:notif.chat.subject, Ann]]",
                "bodyShort": "[[notifications:new_message_from, Ann]]",
                "bodyLong": "hi\nthere",
                "nid": "chat_u1_r1",
                "from": "u1",
                "path": "/chats/r1"
            })
        );
    }

    #[test]
    fn test_group_notification_type() {
        let fields = NotificationFields::chat(&"u1".into(), &"r1".into(), &message("hey"), true);
        assert_eq!(fields.kind, NotificationType::NewGroupChat);
    }
}
