//! Session facade integration tests.

mod common;

use std::sync::Arc;

use serde_json::json;

use common::{test_config, wait_for_state, MockTransport, OpenBehavior, ServerEnd};
use hc_core::auth::StaticAuth;
use hc_core::constants::storage_keys;
use hc_core::storage::{KeyStore, MemoryKeyStore};
use hc_socket::{ChatClient, ConnectionState, Frame, SocketEventType};
use tokio::sync::mpsc;

struct Session {
    client: ChatClient,
    store: Arc<MemoryKeyStore>,
    transport: Arc<MockTransport>,
    servers: mpsc::UnboundedReceiver<ServerEnd>,
}

async fn started(max_attempts: u32) -> (Session, ServerEnd) {
    let (transport, mut servers) = MockTransport::new(OpenBehavior::Accept);
    let store = Arc::new(MemoryKeyStore::new());
    let client = ChatClient::new(
        test_config(max_attempts),
        Arc::new(StaticAuth::new("test-token")),
        transport.clone(),
        store.clone(),
    );

    assert!(client.start().await);
    let mut server = servers.recv().await.unwrap();
    wait_for_state(client.manager(), ConnectionState::Connected).await;
    server.drain_snapshot_requests().await;

    (Session { client, store, transport, servers }, server)
}

#[tokio::test]
async fn start_initializes_keys_and_default_handlers() {
    let (session, _server) = started(3).await;

    assert!(session.client.key_manager().has_keys().await);
    assert!(session.store.get(storage_keys::ENCRYPTION_KEY).unwrap().is_some());
    for name in SocketEventType::all_event_names() {
        assert!(session.client.handlers().has_handler(name), "{name}");
    }

    let info = session.client.encryption_info().await;
    assert!(info.active);
    assert!(info.hipaa_compliant);
}

#[tokio::test]
async fn routed_frames_become_typed_events() {
    let (session, server) = started(3).await;
    let mut events = session.client.dispatcher().subscribe();

    server.send("typing_start", json!({"userId": "u4", "channelId": "icu"}));
    server.send("message_read", json!({"userId": "u4", "messageIds": ["m1"]}));

    let typing = events.recv().await.unwrap();
    assert_eq!(typing.event_type, SocketEventType::TypingStart);
    assert_eq!(typing.as_typing().unwrap().channel_id.as_deref(), Some("icu"));

    let read = events.recv().await.unwrap();
    assert_eq!(read.as_read_receipt().unwrap().message_ids, vec!["m1".to_string()]);
}

#[tokio::test]
async fn chat_messages_are_sent_encrypted() {
    let (session, mut server) = started(3).await;
    let message = json!({"id": "m-1", "sender": "dr.lee", "channel": "icu", "text": "Patient consent on file"});

    assert!(session.client.send_chat_message(&message).await);

    let envelope = server.next_envelope().await;
    assert_eq!(envelope.kind, "message");
    assert_eq!(envelope.payload["encrypted"], true);
    assert_eq!(envelope.payload["channel"], "icu");
    assert!(!envelope.payload.to_string().contains("consent"));

    assert_eq!(session.client.decrypt_message(&envelope.payload).await, message);
}

#[tokio::test]
async fn chat_messages_without_id_get_one() {
    let (session, mut server) = started(3).await;

    assert!(session.client.send_chat_message(&json!({"channel": "icu", "text": "vitals stable"})).await);

    let envelope = server.next_envelope().await;
    let plain = session.client.decrypt_message(&envelope.payload).await;
    let id = plain["id"].as_str().unwrap();
    assert_eq!(id.len(), 36);
    assert_eq!(plain["text"], "vitals stable");
}

#[tokio::test(start_paused = true)]
async fn reconnect_resets_throttle_windows() {
    let (mut session, server) = started(3).await;
    let broadcaster = session.client.broadcaster();

    assert!(broadcaster.broadcast("typing_start", json!({}), false).await);
    assert!(!broadcaster.broadcast("typing_start", json!({}), false).await);

    server.close(1006, "network blip");
    let mut next = session.servers.recv().await.unwrap();
    wait_for_state(session.client.manager(), ConnectionState::Connected).await;
    next.drain_snapshot_requests().await;
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }

    // Reconnected 1s later, inside the 2s typing window.
    assert!(broadcaster.broadcast("typing_start", json!({}), false).await);
    assert_eq!(next.next_envelope().await.kind, "typing_start");
    assert_eq!(session.transport.open_count(), 2);
}

#[tokio::test]
async fn logout_disconnects_and_forgets_keys() {
    let (session, mut server) = started(3).await;

    session.client.logout().await;

    assert_eq!(session.client.manager().connection_status(), ConnectionState::Disconnected);
    assert_eq!(
        server.next_frame().await,
        Some(Frame::Close { code: 1000, reason: "logout".into() })
    );
    assert!(!session.client.key_manager().has_keys().await);
    for key in storage_keys::ALL {
        assert!(session.store.get(key).unwrap().is_none(), "{key} survived logout");
    }
    assert!(!session.client.manager().has_pending_reconnect().await);
}
