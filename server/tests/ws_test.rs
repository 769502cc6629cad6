//! Integration tests for WebSocket connection lifecycle, presence
//! broadcasts, and message relay fanout.

use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;
type WsWrite = futures_util::stream::SplitSink<WsStream, Message>;
type WsRead = futures_util::stream::SplitStream<WsStream>;

/// Start the relay on a random port with a 1-second store window.
/// Returns the bound address and the local signing key.
async fn start_test_server(store_base_url: &str) -> (SocketAddr, Vec<u8>) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let signing_key = duet_server::auth::token::load_or_generate_signing_key(&data_dir)
        .expect("Failed to generate signing key");

    let state = duet_server::state::AppState {
        presence: Arc::new(duet_server::presence::PresenceRegistry::new()),
        rooms: Arc::new(duet_server::rooms::RoomRegistry::new()),
        typing: duet_server::chat::signal::new_typing_registry(),
        verifier: Arc::new(duet_server::auth::verifier::TokenVerifier::new(
            signing_key.clone(),
            "http://127.0.0.1:9/tokeninfo".to_string(),
            None,
        )),
        store: Arc::new(duet_server::store::MessageStore::new(
            store_base_url.to_string(),
            1,
        )),
        connections: Arc::new(AtomicUsize::new(0)),
        started_at: Instant::now(),
    };

    let app = duet_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    (addr, signing_key)
}

/// Minimal stand-in for the durable store: answers every POST /api/messages
/// with a fixed record id.
async fn start_mock_store() -> SocketAddr {
    let app = axum::Router::new().route(
        "/api/messages",
        axum::routing::post(|| async { axum::Json(json!({ "id": "store-assigned-id" })) }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Store variant that answers too late for the relay's 1-second window.
async fn start_slow_mock_store() -> SocketAddr {
    let app = axum::Router::new().route(
        "/api/messages",
        axum::routing::post(|| async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            axum::Json(json!({ "id": "too-late-id" }))
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn token(secret: &[u8], user_id: &str, email: Option<&str>, name: Option<&str>) -> String {
    duet_server::auth::token::issue_local_token(secret, user_id, email, name, 900)
        .expect("Failed to issue token")
}

async fn connect(addr: SocketAddr, token: &str) -> (WsWrite, WsRead) {
    let ws_url = format!("ws://{}/ws?token={}", addr, token);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream.split()
}

/// Read server events, skipping others, until one with the given name
/// arrives.
async fn wait_for_event(read: &mut WsRead, event: &str) -> Value {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let value: Value =
                    serde_json::from_str(text.as_str()).expect("valid JSON event");
                if value["event"] == event {
                    return value;
                }
            }
            Ok(Some(Ok(_))) => continue,
            other => panic!("connection ended waiting for {event}: {other:?}"),
        }
    }
}

/// Skip keyed snapshot broadcasts and return the flat check-online reply.
async fn wait_for_flat_online_status(read: &mut WsRead) -> Value {
    loop {
        let value = wait_for_event(read, "online-status").await;
        if value["data"].get("byId").is_none() {
            return value;
        }
    }
}

async fn send_event(write: &mut WsWrite, event: Value) {
    write
        .send(Message::Text(event.to_string().into()))
        .await
        .expect("Failed to send event");
}

#[tokio::test]
async fn test_connect_receives_ack_and_snapshot() {
    let (addr, secret) = start_test_server("http://127.0.0.1:9").await;
    let (_write, mut read) = connect(addr, &token(&secret, "u1", None, Some("Alice"))).await;

    let ack = wait_for_event(&mut read, "connected").await;
    assert_eq!(ack["data"]["userId"], "u1");
    assert_eq!(ack["data"]["userName"], "Alice");

    // Full snapshot goes to everyone including the new connection.
    let status = wait_for_event(&mut read, "online-status").await;
    assert_eq!(status["data"]["byId"]["u1"], true);
}

#[tokio::test]
async fn test_missing_credential_closed_with_4001() {
    let (addr, _secret) = start_test_server("http://127.0.0.1:9").await;

    let (ws_stream, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .expect("WebSocket should upgrade even without a token");
    let (_write, mut read) = ws_stream.split();

    let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("Expected close message within timeout");

    match msg {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(frame.code, CloseCode::from(4001));
        }
        other => panic!("Expected close frame, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_credential_closed_with_4002() {
    let (addr, _secret) = start_test_server("http://127.0.0.1:9").await;

    let (ws_stream, _) =
        tokio_tungstenite::connect_async(format!("ws://{}/ws?token=not-a-real-token", addr))
            .await
            .expect("WebSocket should upgrade even with a bad token");
    let (_write, mut read) = ws_stream.split();

    let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("Expected close message within timeout");

    match msg {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(frame.code, CloseCode::from(4002));
        }
        other => panic!("Expected close frame, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_message_fanout_adopts_store_id() {
    let store = start_mock_store().await;
    let (addr, secret) = start_test_server(&format!("http://{}", store)).await;

    let (mut w1, mut r1) = connect(addr, &token(&secret, "u1", None, Some("Alice"))).await;
    wait_for_event(&mut r1, "connected").await;
    let (_w2, mut r2) = connect(addr, &token(&secret, "u2", None, Some("Bob"))).await;
    wait_for_event(&mut r2, "connected").await;

    send_event(
        &mut w1,
        json!({"event": "send-message", "data": {"recipientId": "u2", "message": "hi"}}),
    )
    .await;

    // Exactly one receive event for the recipient, with the store id.
    let received = wait_for_event(&mut r2, "receive-message").await;
    assert_eq!(received["data"]["body"], "hi");
    assert_eq!(received["data"]["senderId"], "u1");
    assert_eq!(received["data"]["senderName"], "Alice");
    assert_eq!(received["data"]["conversationId"], "u1_u2");
    assert_eq!(received["data"]["persisted"], true);
    assert_eq!(received["data"]["id"], "store-assigned-id");

    // And one ack for the sender carrying the same record.
    let ack = wait_for_event(&mut r1, "message-sent").await;
    assert_eq!(ack["data"]["id"], "store-assigned-id");
    assert_eq!(ack["data"]["recipientId"], "u2");
}

#[tokio::test]
async fn test_email_keyed_delivery() {
    let store = start_mock_store().await;
    let (addr, secret) = start_test_server(&format!("http://{}", store)).await;

    let (mut w1, mut r1) = connect(addr, &token(&secret, "u1", None, Some("Alice"))).await;
    wait_for_event(&mut r1, "connected").await;
    let (_w2, mut r2) =
        connect(addr, &token(&secret, "u2", Some("b@x.com"), Some("Bob"))).await;
    wait_for_event(&mut r2, "connected").await;

    // No recipientId at all — routing must fall back to the email key.
    send_event(
        &mut w1,
        json!({"event": "send-message", "data": {"recipientEmail": "b@x.com", "message": "hi"}}),
    )
    .await;

    let received = wait_for_event(&mut r2, "receive-message").await;
    assert_eq!(received["data"]["body"], "hi");
    assert_eq!(
        received["data"]["conversationId"],
        duet_server::rooms::room_id("u1", "b@x.com")
    );
}

#[tokio::test]
async fn test_unreachable_store_still_delivers() {
    // Nothing listens on the store address: every forward fails fast.
    let (addr, secret) = start_test_server("http://127.0.0.1:9").await;

    let (mut w1, mut r1) = connect(addr, &token(&secret, "u1", None, None)).await;
    wait_for_event(&mut r1, "connected").await;
    let (_w2, mut r2) = connect(addr, &token(&secret, "u2", None, None)).await;
    wait_for_event(&mut r2, "connected").await;

    send_event(
        &mut w1,
        json!({"event": "send-message", "data": {"recipientId": "u2", "message": "hi"}}),
    )
    .await;

    let received = wait_for_event(&mut r2, "receive-message").await;
    assert_eq!(received["data"]["persisted"], false);
    // The locally generated id survives when the store never answered.
    assert_ne!(received["data"]["id"], "store-assigned-id");

    let ack = wait_for_event(&mut r1, "message-sent").await;
    assert_eq!(ack["data"]["persisted"], false);
}

#[tokio::test]
async fn test_slow_store_bounded_by_timeout() {
    let store = start_slow_mock_store().await;
    let (addr, secret) = start_test_server(&format!("http://{}", store)).await;

    let (mut w1, mut r1) = connect(addr, &token(&secret, "u1", None, None)).await;
    wait_for_event(&mut r1, "connected").await;
    let (_w2, mut r2) = connect(addr, &token(&secret, "u2", None, None)).await;
    wait_for_event(&mut r2, "connected").await;

    let started = Instant::now();
    send_event(
        &mut w1,
        json!({"event": "send-message", "data": {"recipientId": "u2", "message": "hi"}}),
    )
    .await;

    // Delivery completes within the 1-second store window plus overhead,
    // well before the slow store's 3-second answer.
    let received = wait_for_event(&mut r2, "receive-message").await;
    assert!(started.elapsed() < Duration::from_millis(2500));
    assert_eq!(received["data"]["persisted"], false);
    assert_ne!(received["data"]["id"], "too-late-id");
}

#[tokio::test]
async fn test_check_online_flat_reply() {
    let (addr, secret) = start_test_server("http://127.0.0.1:9").await;

    let (mut w1, mut r1) = connect(addr, &token(&secret, "u1", None, None)).await;
    wait_for_event(&mut r1, "connected").await;
    let (_w2, mut r2) = connect(addr, &token(&secret, "u2", None, None)).await;
    wait_for_event(&mut r2, "connected").await;

    send_event(
        &mut w1,
        json!({"event": "check-online", "data": {"userIds": ["u2", "u9"]}}),
    )
    .await;

    let reply = wait_for_flat_online_status(&mut r1).await;
    assert_eq!(reply["data"]["u2"], true);
    assert_eq!(reply["data"]["u9"], false);
    assert_eq!(reply["data"].as_object().unwrap().len(), 2);
}

#[tokio::test]
async fn test_disconnect_broadcasts_offline_and_fresh_snapshot() {
    let (addr, secret) = start_test_server("http://127.0.0.1:9").await;

    let (_w1, mut r1) = connect(addr, &token(&secret, "u1", None, None)).await;
    wait_for_event(&mut r1, "connected").await;
    let (mut w2, mut r2) =
        connect(addr, &token(&secret, "u2", Some("b@x.com"), Some("Bob"))).await;
    wait_for_event(&mut r2, "connected").await;

    // u1 sees u2 arrive.
    let online = wait_for_event(&mut r1, "user-online").await;
    assert_eq!(online["data"]["userId"], "u2");
    assert_eq!(online["data"]["userEmail"], "b@x.com");

    w2.send(Message::Close(None)).await.expect("close u2");

    let offline = wait_for_event(&mut r1, "user-offline").await;
    assert_eq!(offline["data"]["userId"], "u2");
    assert_eq!(offline["data"]["userEmail"], "b@x.com");

    // The post-removal snapshot omits u2 from both key spaces.
    let status = wait_for_event(&mut r1, "online-status").await;
    assert_eq!(status["data"]["byId"]["u1"], true);
    assert!(status["data"]["byId"].get("u2").is_none());
    assert!(status["data"]["byEmail"].get("b@x.com").is_none());
}

#[tokio::test]
async fn test_typing_signal_reaches_recipient_only() {
    let (addr, secret) = start_test_server("http://127.0.0.1:9").await;

    let (mut w1, mut r1) = connect(addr, &token(&secret, "u1", None, Some("Alice"))).await;
    wait_for_event(&mut r1, "connected").await;
    let (_w2, mut r2) = connect(addr, &token(&secret, "u2", None, None)).await;
    wait_for_event(&mut r2, "connected").await;

    send_event(
        &mut w1,
        json!({"event": "typing", "data": {"recipientId": "u2", "isTyping": true}}),
    )
    .await;

    let typing = wait_for_event(&mut r2, "user-typing").await;
    assert_eq!(typing["data"]["userId"], "u1");
    assert_eq!(typing["data"]["userName"], "Alice");
    assert_eq!(typing["data"]["isTyping"], true);
    assert_eq!(typing["data"]["conversationId"], "u1_u2");
}

#[tokio::test]
async fn test_room_broadcast_and_read_receipts() {
    let store = start_mock_store().await;
    let (addr, secret) = start_test_server(&format!("http://{}", store)).await;

    let (mut w1, mut r1) = connect(addr, &token(&secret, "u1", None, None)).await;
    wait_for_event(&mut r1, "connected").await;
    let (mut w2, mut r2) = connect(addr, &token(&secret, "u2", None, None)).await;
    wait_for_event(&mut r2, "connected").await;

    send_event(
        &mut w1,
        json!({"event": "join-conversation", "data": {"otherUserId": "u2"}}),
    )
    .await;
    let joined = wait_for_event(&mut r1, "conversation-joined").await;
    assert_eq!(joined["data"]["conversationId"], "u1_u2");
    assert_eq!(joined["data"]["otherUserId"], "u2");

    send_event(
        &mut w2,
        json!({"event": "join-conversation", "data": {"otherUserId": "u1"}}),
    )
    .await;
    wait_for_event(&mut r2, "conversation-joined").await;

    send_event(
        &mut w1,
        json!({"event": "send-message", "data": {"recipientId": "u2", "message": "hello room"}}),
    )
    .await;

    // The room broadcast carries the pre-persistence record: local id,
    // persisted=false, even though the direct copies adopted the store id.
    let room_copy = wait_for_event(&mut r1, "new-message").await;
    assert_eq!(room_copy["data"]["body"], "hello room");
    assert_eq!(room_copy["data"]["persisted"], false);
    assert_ne!(room_copy["data"]["id"], "store-assigned-id");

    let direct = wait_for_event(&mut r2, "receive-message").await;
    assert_eq!(direct["data"]["id"], "store-assigned-id");

    send_event(
        &mut w2,
        json!({"event": "mark-read", "data": {"conversationId": "u1_u2", "messageIds": ["m1", "m2"]}}),
    )
    .await;

    let receipt = wait_for_event(&mut r1, "messages-read").await;
    assert_eq!(receipt["data"]["conversationId"], "u1_u2");
    assert_eq!(receipt["data"]["readBy"], "u2");
    assert_eq!(receipt["data"]["messageIds"][0], "m1");
}

#[tokio::test]
async fn test_reconnect_supersedes_stale_connection() {
    let store = start_mock_store().await;
    let (addr, secret) = start_test_server(&format!("http://{}", store)).await;

    let u1_token = token(&secret, "u1", None, None);
    let (mut w_old, mut r_old) = connect(addr, &u1_token).await;
    wait_for_event(&mut r_old, "connected").await;

    // Second connection for the same identity supersedes the first.
    let (_w_new, mut r_new) = connect(addr, &u1_token).await;
    wait_for_event(&mut r_new, "connected").await;

    // The stale connection closing must not evict the newer mapping.
    w_old.send(Message::Close(None)).await.expect("close old");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (mut w2, mut r2) = connect(addr, &token(&secret, "u2", None, None)).await;
    wait_for_event(&mut r2, "connected").await;

    send_event(
        &mut w2,
        json!({"event": "check-online", "data": {"userIds": ["u1"]}}),
    )
    .await;
    let reply = wait_for_flat_online_status(&mut r2).await;
    assert_eq!(reply["data"]["u1"], true);

    // And direct delivery still routes to the live connection.
    send_event(
        &mut w2,
        json!({"event": "send-message", "data": {"recipientId": "u1", "message": "still here?"}}),
    )
    .await;
    let received = wait_for_event(&mut r_new, "receive-message").await;
    assert_eq!(received["data"]["body"], "still here?");
}

#[tokio::test]
async fn test_unknown_event_answered_with_error() {
    let (addr, secret) = start_test_server("http://127.0.0.1:9").await;

    let (mut w1, mut r1) = connect(addr, &token(&secret, "u1", None, None)).await;
    wait_for_event(&mut r1, "connected").await;

    send_event(&mut w1, json!({"event": "self-destruct", "data": {}})).await;

    let error = wait_for_event(&mut r1, "error").await;
    assert!(error["data"]["message"]
        .as_str()
        .unwrap()
        .contains("unrecognized event"));
}

#[tokio::test]
async fn test_status_endpoint_reports_counts() {
    let (addr, secret) = start_test_server("http://127.0.0.1:9").await;

    let (_w1, mut r1) = connect(addr, &token(&secret, "u1", None, None)).await;
    wait_for_event(&mut r1, "connected").await;

    let body: Value = reqwest::get(format!("http://{}/api/status", addr))
        .await
        .expect("status request")
        .json()
        .await
        .expect("status JSON");
    assert_eq!(body["connections"], 1);
    assert_eq!(body["onlineUsers"], 1);
}
