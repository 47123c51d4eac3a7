//! WebSocket connection manager.
//!
//! Owns the connection state machine
//! (`Disconnected -> Connecting -> Connected -> Disconnected`), the
//! handshake timeout, heartbeat liveness checks, reconnection with capped
//! exponential backoff, and dispatch of inbound frames.
//!
//! Every connection attempt is tagged with an epoch. Tasks belonging to a
//! superseded epoch find out when they next take the session lock and
//! stop, so a late close or heartbeat from an old socket never touches the
//! current one. The close handler is the only place that moves an open or
//! opening connection to `Disconnected` and schedules a reconnect.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use url::Url;

use hc_core::auth::AuthProvider;
use hc_core::config::AppConfig;
use hc_core::config::ServerConfig;
use hc_core::constants::{close_codes, message_types};
use hc_crypto::EncryptionService;

use crate::directory::Directory;
use crate::events::{ConnectionState, InboundKind, MessageEnvelope};
use crate::handlers::HandlerRegistry;
use crate::heartbeat::HeartbeatMonitor;
use crate::reconnect::ReconnectPolicy;
use crate::transport::{build_url, redacted, Frame, SocketConnection, Transport, TransportEvent};

/// Capacity of the decrypted message broadcast channel.
const MESSAGE_CHANNEL_CAPACITY: usize = 256;

/// Which task is running the close handler; that task is not aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseOrigin {
    Connection,
    Heartbeat,
    /// The peer or the transport already closed the socket.
    Peer,
}

/// Mutable per-connection state, guarded by one lock.
struct Session {
    epoch: u64,
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    connection_task: Option<JoinHandle<()>>,
    heartbeat_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
    monitor: Option<HeartbeatMonitor>,
    policy: ReconnectPolicy,
}

struct Inner {
    server: ServerConfig,
    heartbeat_interval: Duration,
    auth: Arc<dyn AuthProvider>,
    transport: Arc<dyn Transport>,
    encryption: EncryptionService,
    handlers: Arc<HandlerRegistry>,
    state_tx: watch::Sender<ConnectionState>,
    messages_tx: broadcast::Sender<Value>,
    directory: Directory,
    session: Mutex<Session>,
}

/// Connection manager for the chat server socket.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager. No connection is opened until `connect`.
    pub fn new(
        config: &AppConfig,
        auth: Arc<dyn AuthProvider>,
        transport: Arc<dyn Transport>,
        encryption: EncryptionService,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (messages_tx, _) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                server: config.server.clone(),
                heartbeat_interval: config.heartbeat.interval(),
                auth,
                transport,
                encryption,
                handlers,
                state_tx,
                messages_tx,
                directory: Directory::new(),
                session: Mutex::new(Session {
                    epoch: 0,
                    outbound: None,
                    connection_task: None,
                    heartbeat_task: None,
                    reconnect_task: None,
                    monitor: None,
                    policy: ReconnectPolicy::new(&config.reconnect),
                }),
            }),
        }
    }

    /// Current connection state.
    pub fn connection_status(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Subscribe to decrypted inbound chat messages.
    pub fn subscribe_messages(&self) -> broadcast::Receiver<Value> {
        self.inner.messages_tx.subscribe()
    }

    /// Subscribe to the user list.
    pub fn subscribe_users(&self) -> watch::Receiver<Vec<Value>> {
        self.inner.directory.subscribe_users()
    }

    /// Subscribe to the channel list.
    pub fn subscribe_channels(&self) -> watch::Receiver<Vec<Value>> {
        self.inner.directory.subscribe_channels()
    }

    pub fn users(&self) -> Vec<Value> {
        self.inner.directory.users()
    }

    pub fn channels(&self) -> Vec<Value> {
        self.inner.directory.channels()
    }

    /// Registry consulted for non-built-in message types.
    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.inner.handlers
    }

    /// Reconnect attempts claimed since the last successful connect.
    pub async fn reconnect_attempts(&self) -> u32 {
        self.inner.session.lock().await.policy.attempt_count()
    }

    /// Whether a reconnect timer is waiting to fire.
    pub async fn has_pending_reconnect(&self) -> bool {
        self.inner
            .session
            .lock()
            .await
            .reconnect_task
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Start connecting.
    ///
    /// Returns true when an attempt was started or one is already under
    /// way. Returns false, without opening a socket, when the auth
    /// provider reports no session or the server address is unusable.
    pub async fn connect(&self) -> bool {
        let mut session = self.inner.session.lock().await;

        let state = self.connection_status();
        if state != ConnectionState::Disconnected {
            debug!(category = "connection", %state, "connect ignored, already active");
            return true;
        }

        let Some(url) = self.inner.authorized_url() else {
            return false;
        };

        if let Some(pending) = session.reconnect_task.take() {
            pending.abort();
        }
        self.inner.start_attempt(&mut session, url);
        true
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Cancels the reconnect timer and heartbeat, sends a normal (1000)
    /// close with `reason`, and always ends `Disconnected`. Idempotent.
    pub async fn disconnect(&self, reason: &str) {
        let mut session = self.inner.session.lock().await;
        session.epoch += 1;

        if let Some(task) = session.reconnect_task.take() {
            task.abort();
        }
        if let Some(task) = session.heartbeat_task.take() {
            task.abort();
        }
        session.monitor = None;

        if let Some(outbound) = session.outbound.take() {
            let _ = outbound.send(Frame::Close {
                code: close_codes::NORMAL,
                reason: reason.to_string(),
            });
        }
        if let Some(task) = session.connection_task.take() {
            task.abort();
        }

        if self.inner.set_state(ConnectionState::Disconnected) {
            info!(category = "connection", reason, "disconnected");
        }
    }

    /// Send an envelope.
    ///
    /// Returns false and writes nothing unless `Connected`.
    pub async fn send_message(&self, envelope: &MessageEnvelope) -> bool {
        let session = self.inner.session.lock().await;
        if self.connection_status() != ConnectionState::Connected {
            debug!(category = "connection", kind = %envelope.kind, "not connected, message not sent");
            return false;
        }
        self.inner.write(&session, envelope)
    }
}

impl Inner {
    /// Publish a state transition. Returns true when the state changed.
    fn set_state(&self, new_state: ConnectionState) -> bool {
        let mut previous = new_state;
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == new_state {
                return false;
            }
            previous = *state;
            *state = new_state;
            true
        });
        if changed {
            debug!(category = "connection", "state: {previous} -> {new_state}");
        }
        changed
    }

    /// The server URL with the auth token, or None when not authorized.
    fn authorized_url(&self) -> Option<Url> {
        if !self.auth.is_authenticated() {
            warn!(category = "connection", "not authenticated, refusing to connect");
            return None;
        }
        let Some(token) = self.auth.auth_token().filter(|t| !t.is_empty()) else {
            warn!(category = "connection", "no auth token available, refusing to connect");
            return None;
        };
        match build_url(&self.server.address, &token) {
            Ok(url) => Some(url),
            Err(e) => {
                error!(category = "connection", error = %e, "cannot build server url");
                None
            }
        }
    }

    /// Serialize and queue an envelope on the open socket.
    fn write(&self, session: &Session, envelope: &MessageEnvelope) -> bool {
        let Some(outbound) = session.outbound.as_ref() else {
            return false;
        };
        let text = match serde_json::to_string(envelope) {
            Ok(text) => text,
            Err(e) => {
                error!(category = "connection", kind = %envelope.kind, error = %e, "failed to encode envelope");
                return false;
            }
        };
        if !envelope.is_heartbeat() {
            debug!(category = "connection", kind = %envelope.kind, bytes = text.len(), "sending message");
        }
        outbound.send(Frame::Text(text)).is_ok()
    }

    /// Begin a new attempt under a fresh epoch.
    fn start_attempt(self: &Arc<Self>, session: &mut Session, url: Url) {
        session.epoch += 1;
        let epoch = session.epoch;
        self.set_state(ConnectionState::Connecting);
        info!(category = "connection", url = %redacted(&url), epoch, "connecting");

        let inner = Arc::clone(self);
        session.connection_task = Some(tokio::spawn(async move {
            inner.run_connection(epoch, url).await;
        }));
    }

    /// Open the socket under the handshake timeout, then pump inbound events
    /// until it closes.
    async fn run_connection(self: Arc<Self>, epoch: u64, url: Url) {
        let opened = tokio::time::timeout(self.server.connect_timeout(), self.transport.open(&url)).await;

        let connection = match opened {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                warn!(category = "connection", error = %e, "connection attempt failed");
                self.handle_close(epoch, close_codes::ABNORMAL, &e.to_string(), CloseOrigin::Connection)
                    .await;
                return;
            }
            Err(_) => {
                warn!(
                    category = "connection",
                    timeout_ms = self.server.connect_timeout_ms,
                    "handshake timed out"
                );
                self.handle_close(epoch, close_codes::CONNECT_TIMEOUT, "connection timeout", CloseOrigin::Connection)
                    .await;
                return;
            }
        };

        let SocketConnection { outbound, mut inbound } = connection;
        if !self.on_open(epoch, outbound).await {
            return;
        }

        while let Some(event) = inbound.recv().await {
            match event {
                TransportEvent::Message(text) => self.handle_frame(epoch, &text).await,
                TransportEvent::Error(e) => {
                    warn!(category = "connection", error = %e, "socket error");
                }
                TransportEvent::Closed { code, reason } => {
                    self.handle_close(epoch, code, &reason, CloseOrigin::Peer).await;
                    return;
                }
            }
        }
        self.handle_close(epoch, close_codes::ABNORMAL, "transport ended", CloseOrigin::Peer)
            .await;
    }

    /// Transition to `Connected`. Returns false when the attempt was superseded.
    async fn on_open(self: &Arc<Self>, epoch: u64, outbound: mpsc::UnboundedSender<Frame>) -> bool {
        let mut session = self.session.lock().await;
        if session.epoch != epoch {
            let _ = outbound.send(Frame::Close {
                code: close_codes::NORMAL,
                reason: "superseded".into(),
            });
            return false;
        }

        session.outbound = Some(outbound);
        session.policy.reset();
        session.monitor = Some(HeartbeatMonitor::new(self.heartbeat_interval, Instant::now()));
        self.set_state(ConnectionState::Connected);
        info!(category = "connection", epoch, "connected");

        if !self.heartbeat_interval.is_zero() {
            let inner = Arc::clone(self);
            session.heartbeat_task = Some(tokio::spawn(async move {
                inner.run_heartbeat(epoch).await;
            }));
        }

        for kind in [message_types::GET_USERS, message_types::GET_CHANNELS] {
            self.write(&session, &MessageEnvelope::new(kind, json!({})));
        }
        true
    }

    /// Send heartbeats and watch for a silent peer.
    async fn run_heartbeat(self: Arc<Self>, epoch: u64) {
        let interval = self.heartbeat_interval;
        let Some(start) = Instant::now().checked_add(interval) else {
            warn!(category = "heartbeat", "heartbeat interval out of range, heartbeats disabled");
            return;
        };
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let dead = {
                let mut session = self.session.lock().await;
                if session.epoch != epoch {
                    return;
                }
                let Some(monitor) = session.monitor.as_mut() else {
                    return;
                };
                if monitor.check_dead(Instant::now()) {
                    true
                } else {
                    self.write(&session, &MessageEnvelope::new(message_types::HEARTBEAT, json!({})));
                    false
                }
            };

            if dead {
                warn!(
                    category = "heartbeat",
                    interval_ms = interval.as_millis() as u64,
                    "no heartbeat response, closing connection"
                );
                self.handle_close(epoch, close_codes::HEARTBEAT_TIMEOUT, "heartbeat timeout", CloseOrigin::Heartbeat)
                    .await;
                return;
            }
        }
    }

    /// The close handler.
    ///
    /// Runs at most once per epoch: tears down the connection's tasks,
    /// moves to `Disconnected` and schedules a reconnect.
    async fn handle_close(self: &Arc<Self>, epoch: u64, code: u16, reason: &str, origin: CloseOrigin) {
        let mut session = self.session.lock().await;
        if session.epoch != epoch {
            debug!(category = "connection", epoch, code, "stale close ignored");
            return;
        }
        session.epoch += 1;
        let next_epoch = session.epoch;

        if let Some(outbound) = session.outbound.take() {
            if origin != CloseOrigin::Peer {
                let _ = outbound.send(Frame::Close {
                    code,
                    reason: reason.to_string(),
                });
            }
        }
        if let Some(task) = session.heartbeat_task.take() {
            if origin != CloseOrigin::Heartbeat {
                task.abort();
            }
        }
        if let Some(task) = session.connection_task.take() {
            if !matches!(origin, CloseOrigin::Connection | CloseOrigin::Peer) {
                task.abort();
            }
        }
        session.monitor = None;

        self.set_state(ConnectionState::Disconnected);
        info!(category = "connection", code, reason, "connection closed");

        self.schedule_reconnect(&mut session, next_epoch);
    }

    /// Arm the single reconnect timer, if attempts remain.
    fn schedule_reconnect(self: &Arc<Self>, session: &mut Session, epoch: u64) {
        if let Some(previous) = session.reconnect_task.take() {
            previous.abort();
        }
        if session.policy.is_disabled() {
            info!(category = "connection", "reconnection disabled");
            return;
        }
        let Some(delay) = session.policy.next_delay() else {
            warn!(
                category = "connection",
                max_attempts = session.policy.max_attempts(),
                "maximum reconnection attempts reached"
            );
            return;
        };

        info!(
            category = "connection",
            attempt = session.policy.attempt_count(),
            max_attempts = session.policy.max_attempts(),
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        let inner = Arc::clone(self);
        session.reconnect_task = Some(tokio::spawn(async move {
            sleep(delay).await;
            inner.reconnect(epoch).await;
        }));
    }

    async fn reconnect(self: &Arc<Self>, epoch: u64) {
        let mut session = self.session.lock().await;
        if session.epoch != epoch || *self.state_tx.borrow() != ConnectionState::Disconnected {
            return;
        }
        // This task is the pending timer; release it without aborting.
        session.reconnect_task = None;

        match self.authorized_url() {
            Some(url) => self.start_attempt(&mut session, url),
            None => info!(category = "connection", "reconnect skipped, not authorized"),
        }
    }

    /// Dispatch one inbound text frame.
    async fn handle_frame(&self, epoch: u64, text: &str) {
        let envelope: MessageEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(category = "dispatch", error = %e, bytes = text.len(), "dropping malformed frame");
                return;
            }
        };

        match InboundKind::classify(&envelope.kind) {
            InboundKind::Heartbeat => {
                let mut session = self.session.lock().await;
                if session.epoch == epoch {
                    if let Some(monitor) = session.monitor.as_mut() {
                        monitor.record_response(Instant::now());
                    }
                }
            }
            InboundKind::Message => {
                debug!(category = "dispatch", "chat message received");
                let message = self.encryption.decrypt_message(&envelope.payload).await;
                let _ = self.messages_tx.send(message);
            }
            InboundKind::UserStatus => self.directory.apply_user_status(&envelope.payload),
            InboundKind::ChannelUpdate => self.directory.apply_channel_update(&envelope.payload),
            InboundKind::Error => {
                error!(category = "dispatch", payload = %envelope.payload, "server reported an error");
            }
            InboundKind::Other(kind) => {
                if self.handlers.has_handler(kind) {
                    debug!(category = "dispatch", kind, "routing to handler");
                    self.handlers.handle_message(kind, &envelope.payload);
                } else {
                    warn!(category = "dispatch", kind, "no handler for message type, dropping");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hc_core::auth::StaticAuth;
    use hc_core::error::{HcError, HcResult};
    use hc_core::storage::MemoryKeyStore;
    use hc_crypto::KeyManager;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts open calls and always refuses.
    #[derive(Default)]
    struct RefusingTransport {
        opens: AtomicUsize,
    }

    #[async_trait]
    impl Transport for RefusingTransport {
        async fn open(&self, _url: &Url) -> HcResult<SocketConnection> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Err(HcError::Socket("connection refused".into()))
        }
    }

    fn config(max_attempts: u32) -> AppConfig {
        let mut config = AppConfig::default();
        config.server.address = "ws://localhost:9".into();
        config.reconnect.max_attempts = max_attempts;
        config
    }

    fn manager(config: &AppConfig, auth: StaticAuth, transport: Arc<RefusingTransport>) -> ConnectionManager {
        let keys = Arc::new(KeyManager::new(
            config.encryption.clone(),
            Arc::new(MemoryKeyStore::new()),
        ));
        ConnectionManager::new(
            config,
            Arc::new(auth),
            transport,
            EncryptionService::new(keys),
            Arc::new(HandlerRegistry::new()),
        )
    }

    #[tokio::test]
    async fn test_initial_state() {
        let m = manager(&config(3), StaticAuth::new("t"), Arc::default());
        assert_eq!(m.connection_status(), ConnectionState::Disconnected);
        assert!(m.users().is_empty());
        assert!(!m.has_pending_reconnect().await);
    }

    #[tokio::test]
    async fn test_connect_requires_auth() {
        let transport = Arc::new(RefusingTransport::default());
        let m = manager(&config(3), StaticAuth::anonymous(), transport.clone());
        assert!(!m.connect().await);
        assert_eq!(m.connection_status(), ConnectionState::Disconnected);
        assert_eq!(transport.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_token() {
        let transport = Arc::new(RefusingTransport::default());
        let m = manager(&config(3), StaticAuth::new(""), transport.clone());
        assert!(!m.connect().await);
        assert_eq!(transport.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_send_while_disconnected() {
        let m = manager(&config(3), StaticAuth::new("t"), Arc::default());
        assert!(!m.send_message(&MessageEnvelope::new("typing_start", json!({}))).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_connection_schedules_reconnect() {
        let transport = Arc::new(RefusingTransport::default());
        let m = manager(&config(2), StaticAuth::new("t"), transport.clone());
        let mut status = m.subscribe_status();

        assert!(m.connect().await);
        status.wait_for(|s| *s == ConnectionState::Disconnected).await.unwrap();
        assert!(m.has_pending_reconnect().await);
        assert_eq!(m.reconnect_attempts().await, 1);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.opens.load(Ordering::SeqCst), 3);
        assert!(!m.has_pending_reconnect().await);
        assert_eq!(m.connection_status(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let m = manager(&config(3), StaticAuth::new("t"), Arc::default());
        m.disconnect("first").await;
        m.disconnect("second").await;
        assert_eq!(m.connection_status(), ConnectionState::Disconnected);
    }
}
