//! Shared test utilities for socket integration tests.
//!
//! `MockTransport` stands in for the WebSocket: every accepted `open`
//! hands the test a `ServerEnd` through which it can read what the client
//! wrote and push frames, errors and closes back.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

use hc_core::auth::{AuthProvider, StaticAuth};
use hc_core::config::AppConfig;
use hc_core::error::{HcError, HcResult};
use hc_core::storage::MemoryKeyStore;
use hc_crypto::{EncryptionService, KeyManager};
use hc_socket::{
    ConnectionManager, ConnectionState, Frame, HandlerRegistry, MessageEnvelope, SocketConnection,
    Transport, TransportEvent,
};

/// What the mock does when the client opens a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBehavior {
    Accept,
    Refuse,
    /// Never completes the handshake.
    Hang,
}

/// The server side of one accepted connection.
pub struct ServerEnd {
    pub url: Url,
    pub from_client: mpsc::UnboundedReceiver<Frame>,
    pub to_client: mpsc::UnboundedSender<TransportEvent>,
}

impl ServerEnd {
    /// Next frame written by the client, or None once it dropped the socket.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Next text frame decoded as an envelope. Panics on a close frame.
    pub async fn next_envelope(&mut self) -> MessageEnvelope {
        match self.next_frame().await {
            Some(Frame::Text(text)) => serde_json::from_str(&text).expect("client sent invalid json"),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    /// Skip the user/channel snapshot requests sent right after open.
    pub async fn drain_snapshot_requests(&mut self) {
        assert_eq!(self.next_envelope().await.kind, "get_users");
        assert_eq!(self.next_envelope().await.kind, "get_channels");
    }

    pub fn send(&self, kind: &str, payload: Value) {
        let frame = json!({"type": kind, "payload": payload}).to_string();
        self.send_raw(&frame);
    }

    pub fn send_raw(&self, text: &str) {
        let _ = self.to_client.send(TransportEvent::Message(text.to_string()));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.to_client.send(TransportEvent::Closed {
            code,
            reason: reason.to_string(),
        });
    }

    pub fn fail(&self, error: &str) {
        let _ = self.to_client.send(TransportEvent::Error(error.to_string()));
        self.close(1006, "");
    }

    /// True when nothing is queued from the client right now.
    pub fn is_quiet(&mut self) -> bool {
        matches!(
            self.from_client.try_recv(),
            Err(mpsc::error::TryRecvError::Empty) | Err(mpsc::error::TryRecvError::Disconnected)
        )
    }
}

struct MockState {
    behavior: OpenBehavior,
    opened_at: Vec<Instant>,
}

/// In-memory `Transport`.
pub struct MockTransport {
    state: Mutex<MockState>,
    servers: mpsc::UnboundedSender<ServerEnd>,
}

impl MockTransport {
    pub fn new(behavior: OpenBehavior) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            state: Mutex::new(MockState {
                behavior,
                opened_at: Vec::new(),
            }),
            servers,
        });
        (transport, rx)
    }

    pub fn set_behavior(&self, behavior: OpenBehavior) {
        self.state.lock().unwrap().behavior = behavior;
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().opened_at.len()
    }

    pub fn opened_at(&self) -> Vec<Instant> {
        self.state.lock().unwrap().opened_at.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, url: &Url) -> HcResult<SocketConnection> {
        let behavior = {
            let mut state = self.state.lock().unwrap();
            state.opened_at.push(Instant::now());
            state.behavior
        };

        match behavior {
            OpenBehavior::Refuse => Err(HcError::Socket("connection refused".into())),
            OpenBehavior::Hang => std::future::pending().await,
            OpenBehavior::Accept => {
                let (out_tx, out_rx) = mpsc::unbounded_channel();
                let (in_tx, in_rx) = mpsc::unbounded_channel();
                let _ = self.servers.send(ServerEnd {
                    url: url.clone(),
                    from_client: out_rx,
                    to_client: in_tx,
                });
                Ok(SocketConnection {
                    outbound: out_tx,
                    inbound: in_rx,
                })
            }
        }
    }
}

/// Authenticated, but never has a token.
pub struct TokenlessAuth;

impl AuthProvider for TokenlessAuth {
    fn is_authenticated(&self) -> bool {
        true
    }

    fn auth_token(&self) -> Option<String> {
        None
    }
}

/// Config pointing at a fake server with the given reconnect budget.
pub fn test_config(max_attempts: u32) -> AppConfig {
    let mut config = AppConfig::default();
    config.server.address = "wss://chat.test/socket".into();
    config.reconnect.max_attempts = max_attempts;
    config
}

pub fn test_encryption(config: &AppConfig) -> EncryptionService {
    let keys = Arc::new(KeyManager::new(
        config.encryption.clone(),
        Arc::new(MemoryKeyStore::new()),
    ));
    EncryptionService::new(keys)
}

pub struct Harness {
    pub manager: ConnectionManager,
    pub transport: Arc<MockTransport>,
    pub servers: mpsc::UnboundedReceiver<ServerEnd>,
    pub auth: Arc<StaticAuth>,
    pub encryption: EncryptionService,
    pub handlers: Arc<HandlerRegistry>,
}

impl Harness {
    pub fn new(config: AppConfig, behavior: OpenBehavior) -> Self {
        let (transport, servers) = MockTransport::new(behavior);
        let auth = Arc::new(StaticAuth::new("test-token"));
        let encryption = test_encryption(&config);
        let handlers = Arc::new(HandlerRegistry::new());
        let manager = ConnectionManager::new(
            &config,
            auth.clone(),
            transport.clone(),
            encryption.clone(),
            handlers.clone(),
        );
        Self {
            manager,
            transport,
            servers,
            auth,
            encryption,
            handlers,
        }
    }

    /// Connect and return the server end once the client is `Connected`,
    /// with the snapshot requests already consumed.
    pub async fn connect(&mut self) -> ServerEnd {
        assert!(self.manager.connect().await);
        self.accept().await
    }

    /// Wait for the next accepted socket and the `Connected` state.
    pub async fn accept(&mut self) -> ServerEnd {
        let mut server = self.servers.recv().await.expect("transport dropped");
        wait_for_state(&self.manager, ConnectionState::Connected).await;
        server.drain_snapshot_requests().await;
        server
    }
}

pub async fn wait_for_state(manager: &ConnectionManager, state: ConnectionState) {
    let mut rx = manager.subscribe_status();
    tokio::time::timeout(Duration::from_secs(3600), rx.wait_for(|s| *s == state))
        .await
        .expect("timed out waiting for state")
        .expect("status channel closed");
}
