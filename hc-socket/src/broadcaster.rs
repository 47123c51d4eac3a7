//! Throttled broadcasting of ephemeral events (typing, presence, read
//! receipts, edits).
//!
//! Each event type has a minimum interval between successful sends.
//! Sends inside the window are dropped, never queued.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use hc_core::auth::AuthProvider;

use crate::events::{ConnectionState, MessageEnvelope};
use crate::manager::ConnectionManager;

const TYPING_INTERVAL: Duration = Duration::from_millis(2000);
const PRESENCE_INTERVAL: Duration = Duration::from_millis(5000);
const READ_INTERVAL: Duration = Duration::from_millis(1000);
const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

/// Minimum spacing between two sends of `kind`.
pub fn throttle_interval(kind: &str) -> Duration {
    match kind {
        "typing" | "typing_start" | "typing_stop" | "typing_indicator" => TYPING_INTERVAL,
        "presence" | "presence_update" | "user_status" => PRESENCE_INTERVAL,
        "read" | "read_receipt" | "message_read" => READ_INTERVAL,
        _ => DEFAULT_INTERVAL,
    }
}

/// Sends ephemeral events through the connection manager, rate limited
/// per event type.
pub struct Broadcaster {
    manager: ConnectionManager,
    auth: Arc<dyn AuthProvider>,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl Broadcaster {
    pub fn new(manager: ConnectionManager, auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            manager,
            auth,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Broadcast an event.
    ///
    /// Returns false without side effects when not connected or not
    /// authenticated, and when throttled unless `immediate` is set. A
    /// `timestamp` is added to object payloads that lack one.
    pub async fn broadcast(&self, kind: &str, payload: Value, immediate: bool) -> bool {
        if self.manager.connection_status() != ConnectionState::Connected {
            debug!(category = "broadcast", kind, "not connected, broadcast skipped");
            return false;
        }
        if !self.auth.is_authenticated() {
            debug!(category = "broadcast", kind, "not authenticated, broadcast skipped");
            return false;
        }

        let mut last_sent = self.last_sent.lock().await;
        let now = Instant::now();
        if !immediate {
            if let Some(last) = last_sent.get(kind) {
                if now.saturating_duration_since(*last) < throttle_interval(kind) {
                    trace!(category = "broadcast", kind, "throttled");
                    return false;
                }
            }
        }

        let payload = with_timestamp(payload);
        let sent = self.manager.send_message(&MessageEnvelope::new(kind, payload)).await;
        if sent {
            last_sent.insert(kind.to_string(), now);
        }
        sent
    }

    /// Forget all recorded send times.
    pub async fn reset_throttling(&self) {
        self.last_sent.lock().await.clear();
        debug!(category = "broadcast", "throttling reset");
    }

    /// `typing_start` / `typing_stop` for a channel or direct conversation.
    pub async fn broadcast_typing_indicator(
        &self,
        channel_id: Option<&str>,
        recipient_id: Option<&str>,
        is_typing: bool,
    ) -> bool {
        let kind = if is_typing { "typing_start" } else { "typing_stop" };
        self.broadcast(
            kind,
            json!({"channelId": channel_id, "recipientId": recipient_id, "isTyping": is_typing}),
            false,
        )
        .await
    }

    pub async fn broadcast_read_status(&self, message_ids: &[String], channel_id: Option<&str>) -> bool {
        if message_ids.is_empty() {
            return false;
        }
        self.broadcast(
            "read_receipt",
            json!({"messageIds": message_ids, "channelId": channel_id}),
            false,
        )
        .await
    }

    pub async fn broadcast_user_status(&self, status: &str) -> bool {
        self.broadcast("user_status", json!({"status": status}), false).await
    }

    /// Edits bypass throttling.
    pub async fn broadcast_message_edit(&self, message_id: &str, text: &str) -> bool {
        self.broadcast("message_edited", json!({"messageId": message_id, "text": text}), true)
            .await
    }

    /// Deletions bypass throttling.
    pub async fn broadcast_message_deletion(&self, message_id: &str) -> bool {
        self.broadcast("message_deleted", json!({"messageId": message_id}), true)
            .await
    }
}

fn with_timestamp(payload: Value) -> Value {
    match payload {
        Value::Object(mut map) => {
            map.entry("timestamp")
                .or_insert_with(|| Value::String(chrono::Utc::now().to_rfc3339()));
            Value::Object(map)
        }
        other => other,
    }
}
