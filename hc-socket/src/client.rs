//! Session facade wiring the connection manager, broadcaster, handler
//! registry and encryption together.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use hc_core::auth::AuthProvider;
use hc_core::config::AppConfig;
use hc_core::storage::KeyStore;
use hc_crypto::{EncryptionInfo, EncryptionService, KeyManager};

use crate::broadcaster::Broadcaster;
use crate::events::{ConnectionState, EventDispatcher, MessageEnvelope};
use crate::handlers::{register_default_handlers, HandlerRegistry};
use crate::manager::ConnectionManager;
use crate::transport::Transport;

/// Capacity of the typed event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One signed-in chat session.
pub struct ChatClient {
    config: AppConfig,
    keys: Arc<KeyManager>,
    encryption: EncryptionService,
    handlers: Arc<HandlerRegistry>,
    dispatcher: EventDispatcher,
    manager: ConnectionManager,
    broadcaster: Arc<Broadcaster>,
    throttle_reset_task: Mutex<Option<JoinHandle<()>>>,
}

impl ChatClient {
    pub fn new(
        config: AppConfig,
        auth: Arc<dyn AuthProvider>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn KeyStore>,
    ) -> Self {
        let keys = Arc::new(KeyManager::new(config.encryption.clone(), store));
        let encryption = EncryptionService::new(keys.clone());
        let handlers = Arc::new(HandlerRegistry::new());
        let manager = ConnectionManager::new(
            &config,
            auth.clone(),
            transport,
            encryption.clone(),
            handlers.clone(),
        );
        let broadcaster = Arc::new(Broadcaster::new(manager.clone(), auth));

        Self {
            config,
            keys,
            encryption,
            handlers,
            dispatcher: EventDispatcher::new(EVENT_CHANNEL_CAPACITY),
            manager,
            broadcaster,
            throttle_reset_task: Mutex::new(None),
        }
    }

    /// Prepare the session and connect.
    ///
    /// Loads or generates keys, schedules rotation, installs the default
    /// handlers and starts clearing throttle state on every reconnect.
    /// Returns the result of `connect`.
    pub async fn start(&self) -> bool {
        if self.keys.is_enabled() {
            if !self.keys.init_keys().await {
                warn!(category = "encryption", "key initialization failed, messages will be sent unencrypted");
            }
            self.keys.schedule_default_rotation().await;
        }

        register_default_handlers(&self.handlers, &self.dispatcher);
        self.spawn_throttle_reset().await;

        self.manager.connect().await
    }

    async fn spawn_throttle_reset(&self) {
        let mut task = self.throttle_reset_task.lock().await;
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let mut status = self.manager.subscribe_status();
        let broadcaster = Arc::clone(&self.broadcaster);
        *task = Some(tokio::spawn(async move {
            while status.changed().await.is_ok() {
                let connected = *status.borrow_and_update() == ConnectionState::Connected;
                if connected {
                    broadcaster.reset_throttling().await;
                }
            }
        }));
    }

    /// End the session: disconnect, forget throttle state and key material.
    pub async fn logout(&self) {
        self.manager.disconnect("logout").await;
        self.broadcaster.reset_throttling().await;
        self.keys.cancel_key_rotation().await;
        self.keys.clear_keys().await;
        info!(category = "connection", "logged out");
    }

    /// Encrypt a chat message and send it as a `message` envelope.
    ///
    /// Object messages without an `id` get a random UUID.
    pub async fn send_chat_message(&self, message: &Value) -> bool {
        let mut message = message.clone();
        if let Some(fields) = message.as_object_mut() {
            fields
                .entry("id")
                .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
        }
        let sealed = self.encryption.encrypt_message(&message).await;
        self.manager
            .send_message(&MessageEnvelope::new(
                hc_core::constants::message_types::MESSAGE,
                sealed.to_value(),
            ))
            .await
    }

    pub async fn decrypt_message(&self, message: &Value) -> Value {
        self.encryption.decrypt_message(message).await
    }

    pub async fn encryption_info(&self) -> EncryptionInfo {
        self.encryption.encryption_info().await
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        if let Some(task) = self.throttle_reset_task.get_mut().take() {
            task.abort();
        }
    }
}
