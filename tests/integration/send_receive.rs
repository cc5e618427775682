// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::match_same_arms,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for message send and delivery.
//!
//! A send persists the message, fans `MessageCreated` out to every live
//! connection of both participants (the sender's own connections included),
//! and acknowledges the caller with `SendOk` after the broadcast.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use neochat_proto::message::UserId;
use neochat_proto::wire::{self, ClientFrame, ErrorKind, ServerFrame};
use neochat_server::auth::TokenVerifier;
use neochat_server::server::{self, AppState};
use neochat_server::store::MessageStore;
use tokio_tungstenite::tungstenite;

type WsClient =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn start_test_server() -> (std::net::SocketAddr, Arc<AppState>) {
    let store = MessageStore::open_in_memory().unwrap();
    let verifier = TokenVerifier::new("test-secret", 1);
    let state = Arc::new(AppState::new(store, verifier));
    let (addr, _handle) = server::start_server("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    (addr, state)
}

/// Connects a client, completes the handshake, and returns the stream.
async fn connect_as(
    addr: std::net::SocketAddr,
    state: &AppState,
    user_id: &str,
    username: &str,
) -> WsClient {
    let token = state
        .verifier
        .issue(&UserId::from(user_id), username)
        .unwrap();
    let url = format!("ws://{addr}/ws");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws_send(&mut ws, &ClientFrame::Hello { token }).await;
    match ws_recv(&mut ws).await {
        ServerFrame::Welcome { .. } => ws,
        other => panic!("expected Welcome, got {other:?}"),
    }
}

async fn ws_send(ws: &mut WsClient, frame: &ClientFrame) {
    let bytes = wire::encode_client(frame).unwrap();
    ws.send(tungstenite::Message::Binary(bytes.into()))
        .await
        .unwrap();
}

async fn ws_recv(ws: &mut WsClient) -> ServerFrame {
    let msg = ws.next().await.unwrap().unwrap();
    wire::decode_server(&msg.into_data()).unwrap()
}

/// Asserts that no frame arrives within a short window.
async fn assert_silent(ws: &mut WsClient) {
    let result = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(result.is_err(), "expected no frame, got {result:?}");
}

#[tokio::test]
async fn both_participants_receive_identical_message_events() {
    let (addr, state) = start_test_server().await;
    let mut ws_alice = connect_as(addr, &state, "u1", "alice").await;
    let mut ws_bob = connect_as(addr, &state, "u2", "bob").await;

    ws_send(
        &mut ws_alice,
        &ClientFrame::Send {
            recipient_id: UserId::from("u2"),
            content: "hi".to_string(),
        },
    )
    .await;

    // Bob receives the broadcast event.
    let bob_event = ws_recv(&mut ws_bob).await;
    let ServerFrame::MessageCreated { message: bob_msg } = bob_event else {
        panic!("expected MessageCreated, got {bob_event:?}");
    };
    assert_eq!(bob_msg.content, "hi");
    assert_eq!(bob_msg.sender_id, UserId::from("u1"));
    assert_eq!(bob_msg.recipient_id, UserId::from("u2"));
    assert_eq!(bob_msg.sender_name, "alice");
    assert_eq!(bob_msg.recipient_name, "bob");
    assert!(!bob_msg.read);

    // Alice receives the same event (her echo), then the direct ack.
    let ServerFrame::MessageCreated { message: echo } = ws_recv(&mut ws_alice).await else {
        panic!("expected the sender's echo first");
    };
    assert_eq!(echo, bob_msg);

    let ServerFrame::SendOk { message: acked } = ws_recv(&mut ws_alice).await else {
        panic!("expected SendOk after the echo");
    };
    assert_eq!(acked, bob_msg);
}

#[tokio::test]
async fn offline_recipient_message_persists_and_sender_gets_echo() {
    let (addr, state) = start_test_server().await;
    let mut ws_alice = connect_as(addr, &state, "u1", "alice").await;

    ws_send(
        &mut ws_alice,
        &ClientFrame::Send {
            recipient_id: UserId::from("u2"),
            content: "while you were out".to_string(),
        },
    )
    .await;

    let ServerFrame::MessageCreated { message } = ws_recv(&mut ws_alice).await else {
        panic!("expected the sender's echo");
    };
    let ServerFrame::SendOk { .. } = ws_recv(&mut ws_alice).await else {
        panic!("expected SendOk");
    };

    // No live event is replayed when the recipient connects later; the
    // message is retrieved through the history path instead.
    let mut ws_bob = connect_as(addr, &state, "u2", "bob").await;
    assert_silent(&mut ws_bob).await;

    let history = state
        .store
        .conversation(&UserId::from("u1"), &UserId::from("u2"))
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, message.id);
}

#[tokio::test]
async fn every_device_of_the_recipient_receives_the_event() {
    let (addr, state) = start_test_server().await;
    let mut ws_alice = connect_as(addr, &state, "u1", "alice").await;
    let mut ws_bob_phone = connect_as(addr, &state, "u2", "bob").await;
    let mut ws_bob_laptop = connect_as(addr, &state, "u2", "bob").await;

    ws_send(
        &mut ws_alice,
        &ClientFrame::Send {
            recipient_id: UserId::from("u2"),
            content: "ping".to_string(),
        },
    )
    .await;

    let on_phone = ws_recv(&mut ws_bob_phone).await;
    let on_laptop = ws_recv(&mut ws_bob_laptop).await;
    assert_eq!(on_phone, on_laptop);
    assert!(matches!(on_phone, ServerFrame::MessageCreated { .. }));
}

#[tokio::test]
async fn blank_content_fails_only_to_the_caller() {
    let (addr, state) = start_test_server().await;
    let mut ws_alice = connect_as(addr, &state, "u1", "alice").await;
    let mut ws_bob = connect_as(addr, &state, "u2", "bob").await;

    ws_send(
        &mut ws_alice,
        &ClientFrame::Send {
            recipient_id: UserId::from("u2"),
            content: "   ".to_string(),
        },
    )
    .await;

    match ws_recv(&mut ws_alice).await {
        ServerFrame::Error { kind, .. } => assert_eq!(kind, ErrorKind::InvalidInput),
        other => panic!("expected Error, got {other:?}"),
    }
    assert_silent(&mut ws_bob).await;

    // Nothing was persisted.
    assert!(state
        .store
        .conversation(&UserId::from("u1"), &UserId::from("u2"))
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn self_message_is_rejected() {
    let (addr, state) = start_test_server().await;
    let mut ws_alice = connect_as(addr, &state, "u1", "alice").await;

    ws_send(
        &mut ws_alice,
        &ClientFrame::Send {
            recipient_id: UserId::from("u1"),
            content: "note to self".to_string(),
        },
    )
    .await;

    match ws_recv(&mut ws_alice).await {
        ServerFrame::Error { kind, .. } => assert_eq!(kind, ErrorKind::InvalidInput),
        other => panic!("expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn history_order_follows_creation_time() {
    let (addr, state) = start_test_server().await;
    let mut ws_alice = connect_as(addr, &state, "u1", "alice").await;
    let mut ws_bob = connect_as(addr, &state, "u2", "bob").await;

    for content in ["first", "second", "third"] {
        ws_send(
            &mut ws_alice,
            &ClientFrame::Send {
                recipient_id: UserId::from("u2"),
                content: content.to_string(),
            },
        )
        .await;
        // Wait for the ack so inserts are strictly ordered.
        let _echo = ws_recv(&mut ws_alice).await;
        let _ack = ws_recv(&mut ws_alice).await;
        let _event = ws_recv(&mut ws_bob).await;
    }

    let history = state
        .store
        .conversation(&UserId::from("u2"), &UserId::from("u1"))
        .unwrap();
    let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["first", "second", "third"]);
    assert!(history
        .windows(2)
        .all(|w| w[0].created_at <= w[1].created_at));
}
