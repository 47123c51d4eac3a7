//! Wire envelopes, connection state and typed socket events.
//!
//! Frames on the wire are UTF-8 JSON `{type, payload, timestamp?}`. A
//! handful of types are handled by the connection manager itself
//! (`InboundKind`); everything else goes through the handler registry,
//! whose default handlers publish typed `SocketEvent`s on an
//! `EventDispatcher`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use hc_core::constants::message_types;

/// A single frame exchanged with the chat server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Message type discriminator.
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific payload.
    #[serde(default)]
    pub payload: Value,
    /// ISO-8601 send time. Always set on outbound frames, optional inbound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl MessageEnvelope {
    /// Build an outbound envelope stamped with the current time.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    /// Whether this is a liveness frame.
    pub fn is_heartbeat(&self) -> bool {
        self.kind == message_types::HEARTBEAT
    }
}

/// Inbound types the connection manager handles itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundKind<'a> {
    Heartbeat,
    Message,
    UserStatus,
    ChannelUpdate,
    Error,
    /// Routed to the handler registry.
    Other(&'a str),
}

impl<'a> InboundKind<'a> {
    pub fn classify(kind: &'a str) -> Self {
        match kind {
            message_types::HEARTBEAT => Self::Heartbeat,
            message_types::MESSAGE => Self::Message,
            message_types::USER_STATUS => Self::UserStatus,
            message_types::CHANNEL_UPDATE => Self::ChannelUpdate,
            message_types::ERROR => Self::Error,
            other => Self::Other(other),
        }
    }
}

/// Server event types translated by the default handlers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SocketEventType {
    /// A user came online (`user_connected`).
    UserConnected,
    /// A user went offline (`user_disconnected`).
    UserDisconnected,
    /// A user's presence changed (`presence_update`).
    PresenceUpdate,
    /// A channel was created (`channel_created`).
    ChannelCreated,
    /// A channel was deleted (`channel_deleted`).
    ChannelDeleted,
    /// A message was edited (`message_edited`).
    MessageEdited,
    /// A message was deleted (`message_deleted`).
    MessageDeleted,
    /// A message was read by a participant (`message_read`).
    MessageRead,
    /// A participant started typing (`typing_start`).
    TypingStart,
    /// A participant stopped typing (`typing_stop`).
    TypingStop,
    /// A server-wide notice (`system_notification`).
    SystemNotification,
    /// Unknown/unhandled event type.
    Unknown(String),
}

impl SocketEventType {
    /// Parse an event type string from the server.
    pub fn from_str(s: &str) -> Self {
        match s {
            "user_connected" => Self::UserConnected,
            "user_disconnected" => Self::UserDisconnected,
            "presence_update" => Self::PresenceUpdate,
            "channel_created" => Self::ChannelCreated,
            "channel_deleted" => Self::ChannelDeleted,
            "message_edited" => Self::MessageEdited,
            "message_deleted" => Self::MessageDeleted,
            "message_read" => Self::MessageRead,
            "typing_start" => Self::TypingStart,
            "typing_stop" => Self::TypingStop,
            "system_notification" => Self::SystemNotification,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Convert to the wire type string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::UserConnected => "user_connected",
            Self::UserDisconnected => "user_disconnected",
            Self::PresenceUpdate => "presence_update",
            Self::ChannelCreated => "channel_created",
            Self::ChannelDeleted => "channel_deleted",
            Self::MessageEdited => "message_edited",
            Self::MessageDeleted => "message_deleted",
            Self::MessageRead => "message_read",
            Self::TypingStart => "typing_start",
            Self::TypingStop => "typing_stop",
            Self::SystemNotification => "system_notification",
            Self::Unknown(s) => s.as_str(),
        }
    }

    /// Whether this event type is a typing indicator.
    pub fn is_typing_event(&self) -> bool {
        matches!(self, Self::TypingStart | Self::TypingStop)
    }

    /// All event type strings the default handlers register for.
    pub fn all_event_names() -> &'static [&'static str] {
        &[
            "user_connected",
            "user_disconnected",
            "presence_update",
            "channel_created",
            "channel_deleted",
            "message_edited",
            "message_deleted",
            "message_read",
            "typing_start",
            "typing_stop",
            "system_notification",
        ]
    }
}

/// Typed payload for typing indicator events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub recipient_id: Option<String>,
}

/// Typed payload for read receipts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceiptPayload {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    pub message_ids: Vec<String>,
}

/// Typed payload for message edits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEditPayload {
    pub message_id: String,
    pub text: String,
}

/// Typed payload for message deletions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeletePayload {
    pub message_id: String,
}

/// A socket event with type and associated data payload.
#[derive(Debug, Clone)]
pub struct SocketEvent {
    /// The type of event.
    pub event_type: SocketEventType,
    /// The event payload data from the server.
    pub data: Value,
}

impl SocketEvent {
    /// Try to parse the data as a TypingPayload.
    pub fn as_typing(&self) -> Option<TypingPayload> {
        if self.event_type.is_typing_event() {
            serde_json::from_value(self.data.clone()).ok()
        } else {
            None
        }
    }

    /// Try to parse the data as a ReadReceiptPayload.
    pub fn as_read_receipt(&self) -> Option<ReadReceiptPayload> {
        if self.event_type == SocketEventType::MessageRead {
            serde_json::from_value(self.data.clone()).ok()
        } else {
            None
        }
    }

    /// Try to parse the data as a MessageEditPayload.
    pub fn as_message_edit(&self) -> Option<MessageEditPayload> {
        if self.event_type == SocketEventType::MessageEdited {
            serde_json::from_value(self.data.clone()).ok()
        } else {
            None
        }
    }

    /// Try to parse the data as a MessageDeletePayload.
    pub fn as_message_delete(&self) -> Option<MessageDeletePayload> {
        if self.event_type == SocketEventType::MessageDeleted {
            serde_json::from_value(self.data.clone()).ok()
        } else {
            None
        }
    }
}

/// Broadcast-based event dispatcher for decoupled event handling.
///
/// Uses tokio::broadcast channels so multiple consumers can independently
/// receive and process events without blocking each other.
#[derive(Clone)]
pub struct EventDispatcher {
    sender: broadcast::Sender<SocketEvent>,
}

impl EventDispatcher {
    /// Create a new EventDispatcher with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to receive socket events.
    ///
    /// Slow consumers that fall behind receive `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.sender.subscribe()
    }

    /// Dispatch an event to all active subscribers.
    pub fn dispatch(&self, event: SocketEvent) {
        let event_type = event.event_type.as_str().to_string();
        match self.sender.send(event) {
            Ok(count) => {
                debug!(category = "dispatch", "dispatched {event_type} to {count} subscriber(s)");
            }
            Err(_) => {
                debug!(category = "dispatch", "no subscribers for event {event_type}");
            }
        }
    }
}

/// Connection state for the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected. Reconnection may be pending.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Socket open and exchanging frames.
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}
