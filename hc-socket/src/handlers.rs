//! Handler registry for inbound message types the connection manager does
//! not handle itself.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use hc_core::error::{HcError, HcResult};

use crate::events::{
    EventDispatcher, MessageDeletePayload, MessageEditPayload, ReadReceiptPayload, SocketEvent,
    SocketEventType, TypingPayload,
};

/// Callback invoked with the payload of a routed frame.
pub type MessageHandler = Arc<dyn Fn(&Value) -> HcResult<()> + Send + Sync>;

/// Type-keyed callback table. Last registration for a type wins.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, MessageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, MessageHandler>> {
        self.handlers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, MessageHandler>> {
        self.handlers.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `handler` for `kind`, replacing any previous one.
    ///
    /// Returns false for an empty type name.
    pub fn register_handler<F>(&self, kind: &str, handler: F) -> bool
    where
        F: Fn(&Value) -> HcResult<()> + Send + Sync + 'static,
    {
        if kind.is_empty() {
            warn!(category = "dispatch", "refusing to register handler for empty message type");
            return false;
        }
        let replaced = self.write().insert(kind.to_string(), Arc::new(handler)).is_some();
        if replaced {
            info!(category = "dispatch", kind, "replaced message handler");
        } else {
            debug!(category = "dispatch", kind, "registered message handler");
        }
        true
    }

    pub fn has_handler(&self, kind: &str) -> bool {
        self.read().contains_key(kind)
    }

    /// Run the handler for `kind`.
    ///
    /// Returns true when a handler ran and succeeded. Errors and panics
    /// are logged and reported as false.
    pub fn handle_message(&self, kind: &str, payload: &Value) -> bool {
        // Clone out so the callback may touch the registry.
        let Some(handler) = self.read().get(kind).cloned() else {
            warn!(category = "dispatch", kind, "no handler registered, dropping message");
            return false;
        };

        match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(category = "dispatch", kind, error = %e, "message handler failed");
                false
            }
            Err(_) => {
                error!(category = "dispatch", kind, "message handler panicked");
                false
            }
        }
    }

    /// Remove every registered handler.
    pub fn reset_handlers(&self) {
        self.write().clear();
        debug!(category = "dispatch", "handlers reset");
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

/// Register the default handlers, publishing each routed frame as a typed
/// `SocketEvent` on `dispatcher`.
///
/// Registering again replaces the same entries, so this is idempotent.
pub fn register_default_handlers(registry: &HandlerRegistry, dispatcher: &EventDispatcher) {
    for name in SocketEventType::all_event_names() {
        let event_type = SocketEventType::from_str(name);
        let dispatcher = dispatcher.clone();
        registry.register_handler(name, move |payload| {
            validate(&event_type, payload)?;
            dispatcher.dispatch(SocketEvent {
                event_type: event_type.clone(),
                data: payload.clone(),
            });
            Ok(())
        });
    }
    debug!(
        category = "dispatch",
        count = SocketEventType::all_event_names().len(),
        "default handlers registered"
    );
}

/// Reject payloads that cannot carry the event they claim to be.
fn validate(event_type: &SocketEventType, payload: &Value) -> HcResult<()> {
    fn check<T: serde::de::DeserializeOwned>(payload: &Value, what: &str) -> HcResult<()> {
        serde_json::from_value::<T>(payload.clone())
            .map(|_| ())
            .map_err(|e| HcError::Handler(format!("invalid {what} payload: {e}")))
    }

    match event_type {
        SocketEventType::TypingStart | SocketEventType::TypingStop => {
            check::<TypingPayload>(payload, "typing")
        }
        SocketEventType::MessageRead => check::<ReadReceiptPayload>(payload, "read receipt"),
        SocketEventType::MessageEdited => check::<MessageEditPayload>(payload, "message edit"),
        SocketEventType::MessageDeleted => {
            check::<MessageDeletePayload>(payload, "message deletion")
        }
        _ if payload.is_object() => Ok(()),
        other => Err(HcError::Handler(format!(
            "{} payload must be an object",
            other.as_str()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_register_and_handle() {
        let registry = HandlerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        assert!(registry.register_handler("video_call", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        assert!(registry.has_handler("video_call"));
        assert!(registry.handle_message("video_call", &json!({})));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = HandlerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        registry.register_handler("x", |_| Ok(()));
        let counter = hits.clone();
        registry.register_handler("x", move |_| {
            counter.fetch_add(10, Ordering::SeqCst);
            Ok(())
        });
        registry.handle_message("x", &Value::Null);
        assert_eq!(hits.load(Ordering::SeqCst), 10);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregistered_and_empty() {
        let registry = HandlerRegistry::new();
        assert!(!registry.register_handler("", |_| Ok(())));
        assert!(!registry.handle_message("nothing", &Value::Null));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_failing_handlers_are_contained() {
        let registry = HandlerRegistry::new();
        registry.register_handler("err", |_| Err(HcError::Handler("bad".into())));
        registry.register_handler("boom", |_| panic!("handler bug"));
        registry.register_handler("ok", |_| Ok(()));

        assert!(!registry.handle_message("err", &Value::Null));
        assert!(!registry.handle_message("boom", &Value::Null));
        assert!(registry.handle_message("ok", &Value::Null));
    }

    #[test]
    fn test_handler_may_reenter_registry() {
        let registry = Arc::new(HandlerRegistry::new());
        let inner = registry.clone();
        registry.register_handler("install", move |_| {
            inner.register_handler("installed", |_| Ok(()));
            Ok(())
        });
        assert!(registry.handle_message("install", &Value::Null));
        assert!(registry.has_handler("installed"));
    }

    #[test]
    fn test_reset_handlers() {
        let registry = HandlerRegistry::new();
        registry.register_handler("a", |_| Ok(()));
        registry.reset_handlers();
        assert!(!registry.has_handler("a"));
    }

    #[tokio::test]
    async fn test_default_handlers_publish_typed_events() {
        let registry = HandlerRegistry::new();
        let dispatcher = EventDispatcher::new(16);
        let mut rx = dispatcher.subscribe();

        register_default_handlers(&registry, &dispatcher);
        register_default_handlers(&registry, &dispatcher);
        assert_eq!(registry.len(), SocketEventType::all_event_names().len());

        assert!(registry.handle_message("message_edited", &json!({"messageId": "m1", "text": "fixed"})));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.as_message_edit().unwrap().text, "fixed");

        // Wrong shape is rejected and nothing is published.
        assert!(!registry.handle_message("message_edited", &json!({"text": "no id"})));
        assert!(!registry.handle_message("user_connected", &json!("u1")));
        assert!(rx.try_recv().is_err());
    }
}
