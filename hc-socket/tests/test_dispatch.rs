//! Inbound frame dispatch integration tests.
//!
//! Built-in types (message, user_status, channel_update, heartbeat, error),
//! registry routing for everything else, and tolerance of bad frames and
//! bad handlers.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use common::{test_config, Harness, OpenBehavior};
use hc_core::error::HcError;
use hc_crypto::UNDECRYPTABLE_TEXT;
use hc_socket::ConnectionState;

// ---- Chat messages ----

#[tokio::test]
async fn encrypted_message_reaches_subscribers_decrypted() {
    let mut h = Harness::new(test_config(3), OpenBehavior::Accept);
    let mut messages = h.manager.subscribe_messages();
    let server = h.connect().await;

    let original = json!({"id": "m-1", "sender": "dr.lee", "channel": "icu", "text": "Bed 4 vitals stable"});
    let sealed = h.encryption.encrypt_message(&original).await.to_value();
    assert_eq!(sealed["encrypted"], true);

    server.send("message", sealed);
    assert_eq!(messages.recv().await.unwrap(), original);
}

#[tokio::test]
async fn plaintext_message_passes_through() {
    let mut h = Harness::new(test_config(3), OpenBehavior::Accept);
    let mut messages = h.manager.subscribe_messages();
    let server = h.connect().await;

    let plain = json!({"id": 2, "text": "lunch?", "encrypted": false});
    server.send("message", plain.clone());
    assert_eq!(messages.recv().await.unwrap(), plain);
}

#[tokio::test]
async fn undecryptable_message_becomes_placeholder() {
    let mut h = Harness::new(test_config(3), OpenBehavior::Accept);
    let mut messages = h.manager.subscribe_messages();
    let server = h.connect().await;

    server.send(
        "message",
        json!({
            "id": "m-9",
            "sender": "u2",
            "channel": "er",
            "encrypted": true,
            "encryptionMethod": "ROT13",
            "encryptedData": "Zm9v",
            "timestamp": "2024-03-01T08:00:00Z"
        }),
    );

    let received = messages.recv().await.unwrap();
    assert_eq!(received["decryptionFailed"], true);
    assert_eq!(received["text"], UNDECRYPTABLE_TEXT);
    assert_eq!(received["id"], "m-9");
    assert_eq!(received["channel"], "er");
}

#[tokio::test]
async fn malformed_frames_are_dropped_without_closing() {
    let mut h = Harness::new(test_config(3), OpenBehavior::Accept);
    let mut messages = h.manager.subscribe_messages();
    let server = h.connect().await;

    server.send_raw("not json at all");
    server.send_raw(r#"{"payload": {"missing": "type"}}"#);
    server.send_raw("[1, 2, 3]");
    server.send("message", json!({"id": 3, "text": "still here"}));

    assert_eq!(messages.recv().await.unwrap()["text"], "still here");
    assert_eq!(h.manager.connection_status(), ConnectionState::Connected);
}

#[tokio::test]
async fn server_error_frame_keeps_connection() {
    let mut h = Harness::new(test_config(3), OpenBehavior::Accept);
    let mut messages = h.manager.subscribe_messages();
    let server = h.connect().await;

    server.send("error", json!({"code": "RATE_LIMIT", "message": "slow down"}));
    server.send("message", json!({"id": 4}));

    assert_eq!(messages.recv().await.unwrap()["id"], 4);
    assert_eq!(h.manager.connection_status(), ConnectionState::Connected);
}

// ---- Directory ----

#[tokio::test]
async fn user_list_snapshot_then_delta() {
    let mut h = Harness::new(test_config(3), OpenBehavior::Accept);
    let mut users = h.manager.subscribe_users();
    let server = h.connect().await;

    server.send(
        "user_status",
        json!({"users": [{"id": "u1", "status": "online"}, {"id": "u2", "status": "online"}]}),
    );
    server.send("user_status", json!({"id": "u2", "status": "away"}));

    let list = users
        .wait_for(|list| list.iter().any(|u| u["status"] == "away"))
        .await
        .unwrap()
        .clone();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["status"], "online");
    assert_eq!(h.manager.users(), list);
}

#[tokio::test]
async fn channel_list_upsert_and_delete() {
    let mut h = Harness::new(test_config(3), OpenBehavior::Accept);
    let mut channels = h.manager.subscribe_channels();
    let server = h.connect().await;

    server.send("channel_update", json!({"channels": [{"id": "icu", "name": "ICU"}, {"id": "er", "name": "ER"}]}));
    server.send("channel_update", json!({"id": "peds", "name": "Pediatrics"}));
    server.send("channel_update", json!({"id": "er", "deleted": true}));
    server.send("channel_update", json!({"id": "icu", "name": "ICU North"}));

    let list = channels
        .wait_for(|list| list.iter().any(|c| c["name"] == "ICU North"))
        .await
        .unwrap()
        .clone();
    let names: Vec<&str> = list.iter().filter_map(|c| c["name"].as_str()).collect();
    assert_eq!(names, vec!["ICU North", "Pediatrics"]);
}

// ---- Handler registry routing ----

#[tokio::test]
async fn registered_type_routes_to_handler() {
    let mut h = Harness::new(test_config(3), OpenBehavior::Accept);
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    assert!(h.handlers.register_handler("video_call", move |payload| {
        let _ = tx.send(payload.clone());
        Ok(())
    }));
    let server = h.connect().await;

    server.send("video_call", json!({"room": "r-1"}));
    assert_eq!(rx.recv().await.unwrap()["room"], "r-1");
}

#[tokio::test]
async fn failing_handlers_do_not_break_dispatch() {
    let mut h = Harness::new(test_config(3), OpenBehavior::Accept);
    let mut messages = h.manager.subscribe_messages();
    h.handlers
        .register_handler("broken", |_| Err(HcError::Handler("cannot handle".into())));
    h.handlers.register_handler("explodes", |_| panic!("handler bug"));
    let server = h.connect().await;

    server.send("broken", json!({}));
    server.send("explodes", json!({}));
    server.send("never_registered", json!({}));
    server.send("message", json!({"id": "after"}));

    assert_eq!(messages.recv().await.unwrap()["id"], "after");
    assert_eq!(h.manager.connection_status(), ConnectionState::Connected);
}

#[tokio::test]
async fn built_in_types_bypass_registry() {
    let mut h = Harness::new(test_config(3), OpenBehavior::Accept);
    let mut messages = h.manager.subscribe_messages();
    let hits = Arc::new(AtomicUsize::new(0));
    for kind in ["heartbeat", "message", "user_status"] {
        let hits = hits.clone();
        h.handlers.register_handler(kind, move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }
    let server = h.connect().await;

    server.send("heartbeat", json!({}));
    server.send("user_status", json!({"id": "u1", "status": "online"}));
    server.send("message", json!({"id": 1}));

    messages.recv().await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}
