//! Gateway opcodes, the chat event vocabulary, and wire-format messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_HEARTBEAT_ACK: u8 = 6;

/// Sender name used for join/leave notices on the wire.
pub const SYSTEM_SENDER: &str = "System";

// ---------------------------------------------------------------------------
// Server → Client message
// ---------------------------------------------------------------------------

/// A message sent from the server to the client over WebSocket.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayMessage {
    pub op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    pub d: Value,
}

impl GatewayMessage {
    /// Build a DISPATCH message (op=0).
    pub fn dispatch(event_name: &str, seq: u64, data: Value) -> Self {
        Self {
            op: OP_DISPATCH,
            t: Some(event_name.to_string()),
            s: Some(seq),
            d: data,
        }
    }

    /// Build a HEARTBEAT_ACK message (op=6).
    pub fn heartbeat_ack(seq: u64) -> Self {
        Self {
            op: OP_HEARTBEAT_ACK,
            t: None,
            s: None,
            d: serde_json::json!({ "ack": seq }),
        }
    }
}

// ---------------------------------------------------------------------------
// Client → Server message
// ---------------------------------------------------------------------------

/// A message received from the client over WebSocket.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub op: u8,
    #[serde(default)]
    pub t: Option<String>,
    #[serde(default)]
    pub d: Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct IdentifyPayload {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default)]
    pub seq: u64,
}

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

/// Event names exchanged in DISPATCH frames.
pub struct EventName;

impl EventName {
    // Inbound.
    pub const SEND_MESSAGE: &'static str = "send_message";
    pub const PRIVATE_MESSAGE: &'static str = "private_message";
    pub const ADD_REACTION: &'static str = "add_reaction";
    // Both directions.
    pub const TYPING: &'static str = "typing";
    // Outbound.
    pub const READY: &'static str = "READY";
    pub const RECEIVE_MESSAGE: &'static str = "receive_message";
    pub const RECEIVE_PRIVATE_MESSAGE: &'static str = "receive_private_message";
    pub const REACTION_ADDED: &'static str = "reaction_added";
    pub const ONLINE_USERS: &'static str = "online_users";
    pub const PRIVATE_MESSAGE_UNDELIVERED: &'static str = "private_message_undelivered";
}

// ---------------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------------

/// Opaque file payload carried by private messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub filetype: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessagePayload {
    /// Accepted for compatibility; the authenticated identity is used instead.
    #[serde(default)]
    pub sender: Option<String>,
    pub text: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PrivateMessagePayload {
    pub recipient: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachment: Option<Attachment>,
    // Flat attachment fields, as older clients send them.
    #[serde(default)]
    pub file: Option<Value>,
    #[serde(default)]
    pub filetype: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl PrivateMessagePayload {
    /// The attachment, whether sent nested or as flat `file*` fields.
    pub fn take_attachment(&mut self) -> Option<Attachment> {
        if let Some(attachment) = self.attachment.take() {
            return Some(attachment);
        }
        let data = self.file.take().filter(|v| !v.is_null())?;
        Some(Attachment {
            data,
            filetype: self.filetype.take(),
            filename: self.filename.take(),
        })
    }
}

/// `typing` accepts either `{"isTyping": bool}` or a bare boolean.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TypingPayload {
    Flag(bool),
    Status {
        #[serde(rename = "isTyping")]
        is_typing: bool,
    },
}

impl TypingPayload {
    pub fn is_typing(&self) -> bool {
        match *self {
            TypingPayload::Flag(flag) => flag,
            TypingPayload::Status { is_typing } => is_typing,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddReactionPayload {
    pub message_index: u64,
    pub emoji: String,
}

/// Why a DISPATCH frame could not be turned into an [`InboundEvent`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("dispatch frame has no event name")]
    MissingEventName,
    #[error("unknown event `{0}`")]
    UnknownEvent(String),
    #[error("invalid `{event}` payload: {source}")]
    InvalidPayload {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// The closed set of events a client may send once active.
#[derive(Debug)]
pub enum InboundEvent {
    SendMessage(SendMessagePayload),
    PrivateMessage(PrivateMessagePayload),
    Typing(TypingPayload),
    AddReaction(AddReactionPayload),
}

impl InboundEvent {
    /// Decode a DISPATCH frame's `t` and `d` fields.
    pub fn decode(name: Option<&str>, data: Value) -> Result<Self, DecodeError> {
        fn payload<T: serde::de::DeserializeOwned>(
            event: &'static str,
            data: Value,
        ) -> Result<T, DecodeError> {
            serde_json::from_value(data).map_err(|source| DecodeError::InvalidPayload { event, source })
        }

        match name.ok_or(DecodeError::MissingEventName)? {
            EventName::SEND_MESSAGE => Ok(Self::SendMessage(payload(EventName::SEND_MESSAGE, data)?)),
            EventName::PRIVATE_MESSAGE => {
                Ok(Self::PrivateMessage(payload(EventName::PRIVATE_MESSAGE, data)?))
            }
            EventName::TYPING => Ok(Self::Typing(payload(EventName::TYPING, data)?)),
            EventName::ADD_REACTION => Ok(Self::AddReaction(payload(EventName::ADD_REACTION, data)?)),
            other => Err(DecodeError::UnknownEvent(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound events
// ---------------------------------------------------------------------------

/// Everything the relay delivers to connections.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Broadcast {
        sender: String,
        text: String,
        timestamp: String,
    },
    PrivateMessage {
        sender: String,
        recipient: String,
        text: String,
        attachment: Option<Attachment>,
        timestamp: String,
    },
    TypingStatus {
        user: String,
        is_typing: bool,
    },
    ReactionAdded {
        message_index: u64,
        emoji: String,
        user: String,
    },
    SystemNotice {
        text: String,
        timestamp: String,
    },
    PresenceSnapshot {
        online: Vec<String>,
    },
    /// Sent back to a private message's sender when the recipient is offline.
    PrivateMessageUndelivered {
        recipient: String,
        timestamp: String,
    },
}

impl ChatEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            ChatEvent::Broadcast { .. } | ChatEvent::SystemNotice { .. } => EventName::RECEIVE_MESSAGE,
            ChatEvent::PrivateMessage { .. } => EventName::RECEIVE_PRIVATE_MESSAGE,
            ChatEvent::TypingStatus { .. } => EventName::TYPING,
            ChatEvent::ReactionAdded { .. } => EventName::REACTION_ADDED,
            ChatEvent::PresenceSnapshot { .. } => EventName::ONLINE_USERS,
            ChatEvent::PrivateMessageUndelivered { .. } => EventName::PRIVATE_MESSAGE_UNDELIVERED,
        }
    }

    /// The `d` field of the DISPATCH frame carrying this event.
    pub fn payload(&self) -> Value {
        match self {
            ChatEvent::Broadcast {
                sender,
                text,
                timestamp,
            } => serde_json::json!({
                "sender": sender,
                "text": text,
                "timestamp": timestamp,
            }),
            ChatEvent::PrivateMessage {
                sender,
                text,
                attachment,
                timestamp,
                ..
            } => {
                let mut data = serde_json::json!({
                    "sender": sender,
                    "text": text,
                    "timestamp": timestamp,
                });
                if let Some(attachment) = attachment {
                    data["attachment"] = serde_json::to_value(attachment).unwrap_or_default();
                }
                data
            }
            ChatEvent::TypingStatus { user, is_typing } => serde_json::json!({
                "user": user,
                "isTyping": is_typing,
            }),
            ChatEvent::ReactionAdded {
                message_index,
                emoji,
                user,
            } => serde_json::json!({
                "messageIndex": message_index,
                "emoji": emoji,
                "user": user,
            }),
            ChatEvent::SystemNotice { text, timestamp } => serde_json::json!({
                "sender": SYSTEM_SENDER,
                "text": text,
                "timestamp": timestamp,
            }),
            ChatEvent::PresenceSnapshot { online } => serde_json::json!(online),
            ChatEvent::PrivateMessageUndelivered {
                recipient,
                timestamp,
            } => serde_json::json!({
                "recipient": recipient,
                "timestamp": timestamp,
            }),
        }
    }
}
