//! HIPAA Chat Socket - resilient WebSocket transport for the chat client.
//!
//! This crate provides:
//! - The connection manager: state machine, handshake timeout, heartbeat
//!   liveness detection and reconnection with capped exponential backoff
//! - Inbound dispatch: built-in handling for heartbeat, chat message,
//!   presence and channel frames, and a handler registry for everything else
//! - A broadcast throttler for ephemeral outbound events
//! - Watch/broadcast channel subscriptions for status, messages, users and channels
//! - The `ChatClient` facade tying transport, throttling and encryption together

pub mod broadcaster;
pub mod client;
pub mod directory;
pub mod events;
pub mod handlers;
pub mod heartbeat;
pub mod manager;
pub mod reconnect;
pub mod transport;

// Re-export key types
pub use broadcaster::{throttle_interval, Broadcaster};
pub use client::ChatClient;
pub use directory::Directory;
pub use events::{
    ConnectionState, EventDispatcher, InboundKind, MessageEnvelope, SocketEvent, SocketEventType,
    TypingPayload, ReadReceiptPayload, MessageEditPayload, MessageDeletePayload,
};
pub use handlers::{register_default_handlers, HandlerRegistry, MessageHandler};
pub use manager::ConnectionManager;
pub use reconnect::ReconnectPolicy;
pub use transport::{Frame, SocketConnection, Transport, TransportEvent, WsTransport};
