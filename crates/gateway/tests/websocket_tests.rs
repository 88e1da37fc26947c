mod common;

use std::net::SocketAddr;
use std::time::Duration;

use common::TestApp;
use courier_chats::{ChatService, CreateChat};
use courier_config::RealtimeConfig;
use courier_database::ChatKind;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(addr: SocketAddr, path: &str, token: Option<&str>) -> Client {
    let url = match token {
        Some(token) => format!("ws://{addr}{path}?token={token}"),
        None => format!("ws://{addr}{path}"),
    };
    let (client, _) = connect_async(url).await.unwrap();
    client
}

/// Next event frame, skipping transport pings.
async fn next_event(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for an event")
            .expect("connection ended")
            .unwrap();
        match message {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message {other:?}"),
        }
    }
}

/// Close code sent by the server, skipping any frames before it.
async fn close_code(client: &mut Client) -> u16 {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for close")
            .expect("connection ended without a close frame")
            .unwrap();
        if let Message::Close(frame) = message {
            return frame.map(|f| u16::from(f.code)).unwrap_or(1005);
        }
    }
}

async fn send(client: &mut Client, frame: Value) {
    client.send(Message::Text(frame.to_string())).await.unwrap();
}

async fn group(service: &ChatService, creator: &str, members: &[&str]) -> String {
    service
        .create_chat(CreateChat {
            kind: ChatKind::Group,
            name: Some("team".into()),
            created_by: creator.into(),
            participant_ids: members.iter().map(|m| m.to_string()).collect(),
        })
        .await
        .unwrap()
        .chat
        .id
}

#[tokio::test]
async fn invalid_token_closes_with_unauthorized() {
    let app = TestApp::new().await;
    let addr = app.spawn().await;
    let mut client = connect(addr, "/api/ws", Some("garbage")).await;

    let error = next_event(&mut client).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "unauthorized");
    assert_eq!(close_code(&mut client).await, 4001);
}

#[tokio::test]
async fn authenticate_frame_completes_the_handshake() {
    let app = TestApp::new().await;
    let addr = app.spawn().await;
    let mut client = connect(addr, "/api/ws", None).await;

    send(&mut client, json!({ "type": "authenticate", "token": app.token("alice") })).await;
    let ack = next_event(&mut client).await;
    assert_eq!(ack["type"], "connection_ack");
    assert_eq!(ack["userId"], "alice");

    send(&mut client, json!({ "type": "ping" })).await;
    assert_eq!(next_event(&mut client).await["type"], "pong");
}

#[tokio::test]
async fn messages_reach_every_participant_once() {
    let app = TestApp::new().await;
    let chat_id = group(&app.state.chat_service, "alice", &["bob"]).await;
    let addr = app.spawn().await;

    let mut alice = connect(addr, "/api/ws", Some(&app.token("alice"))).await;
    let mut bob = connect(addr, &format!("/api/chats/{chat_id}/ws"), Some(&app.token("bob"))).await;
    assert_eq!(next_event(&mut alice).await["type"], "connection_ack");
    assert_eq!(next_event(&mut bob).await["type"], "connection_ack");

    send(
        &mut alice,
        json!({ "type": "send_message", "chatId": chat_id, "tempId": "temp-1", "content": "hello" }),
    )
    .await;

    let to_alice = next_event(&mut alice).await;
    let to_bob = next_event(&mut bob).await;
    assert_eq!(to_alice["type"], "message_created");
    assert_eq!(to_bob["type"], "message_created");
    assert_eq!(to_alice["message"]["id"], to_bob["message"]["id"]);
    assert_eq!(to_bob["message"]["content"], "hello");

    // Nothing else was queued for Bob.
    send(&mut bob, json!({ "type": "ping" })).await;
    assert_eq!(next_event(&mut bob).await["type"], "pong");
}

#[tokio::test]
async fn non_participants_get_an_error_reply() {
    let app = TestApp::new().await;
    let chat_id = group(&app.state.chat_service, "alice", &["bob"]).await;
    let addr = app.spawn().await;

    let mut mallory = connect(addr, "/api/ws", Some(&app.token("mallory"))).await;
    next_event(&mut mallory).await;

    send(
        &mut mallory,
        json!({ "type": "send_message", "chatId": chat_id, "tempId": "temp-9", "content": "hi" }),
    )
    .await;

    let error = next_event(&mut mallory).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "not_participant");
    assert_eq!(error["tempId"], "temp-9");
}

#[tokio::test]
async fn chat_scope_requires_membership() {
    let app = TestApp::new().await;
    let chat_id = group(&app.state.chat_service, "alice", &["bob"]).await;
    let addr = app.spawn().await;

    let mut mallory = connect(addr, &format!("/api/chats/{chat_id}/ws"), Some(&app.token("mallory"))).await;

    let error = next_event(&mut mallory).await;
    assert_eq!(error["code"], "invalid_scope");
    assert_eq!(close_code(&mut mallory).await, 4003);
}

#[tokio::test]
async fn frames_for_other_chats_are_rejected_on_scoped_connections() {
    let app = TestApp::new().await;
    let first = group(&app.state.chat_service, "alice", &["bob"]).await;
    let second = group(&app.state.chat_service, "alice", &["bob"]).await;
    let addr = app.spawn().await;

    let mut alice = connect(addr, &format!("/api/chats/{first}/ws"), Some(&app.token("alice"))).await;
    next_event(&mut alice).await;

    send(&mut alice, json!({ "type": "typing", "chatId": second })).await;

    let error = next_event(&mut alice).await;
    assert_eq!(error["code"], "invalid_scope");
}

#[tokio::test]
async fn connection_limit_keeps_existing_sessions() {
    let realtime = RealtimeConfig {
        max_connections_per_user: 1,
        ..RealtimeConfig::default()
    };
    let app = TestApp::with_realtime(realtime).await;
    let addr = app.spawn().await;
    let token = app.token("alice");

    let mut first = connect(addr, "/api/ws", Some(&token)).await;
    next_event(&mut first).await;

    let mut second = connect(addr, "/api/ws", Some(&token)).await;
    let error = next_event(&mut second).await;
    assert_eq!(error["code"], "capacity_exceeded");
    assert_eq!(close_code(&mut second).await, 4008);

    send(&mut first, json!({ "type": "ping" })).await;
    assert_eq!(next_event(&mut first).await["type"], "pong");
    assert_eq!(app.state.registry.connection_count(), 1);
}

#[tokio::test]
async fn malformed_and_oversized_frames_keep_the_connection_open() {
    let realtime = RealtimeConfig {
        max_frame_bytes: 256,
        ..RealtimeConfig::default()
    };
    let app = TestApp::with_realtime(realtime).await;
    let addr = app.spawn().await;
    let mut client = connect(addr, "/api/ws", Some(&app.token("alice"))).await;
    next_event(&mut client).await;

    client.send(Message::Text("{not json".into())).await.unwrap();
    assert_eq!(next_event(&mut client).await["code"], "invalid_frame");

    send(
        &mut client,
        json!({ "type": "send_message", "chatId": "c1", "content": "x".repeat(512) }),
    )
    .await;
    assert_eq!(next_event(&mut client).await["code"], "frame_too_large");

    send(&mut client, json!({ "type": "ping" })).await;
    assert_eq!(next_event(&mut client).await["type"], "pong");
}

#[tokio::test]
async fn delete_for_self_is_only_echoed_to_the_requester() {
    let app = TestApp::new().await;
    let chat_id = group(&app.state.chat_service, "alice", &["bob"]).await;
    let addr = app.spawn().await;

    let mut alice = connect(addr, "/api/ws", Some(&app.token("alice"))).await;
    let mut bob = connect(addr, "/api/ws", Some(&app.token("bob"))).await;
    next_event(&mut alice).await;
    next_event(&mut bob).await;

    send(&mut alice, json!({ "type": "send_message", "chatId": chat_id, "content": "oops" })).await;
    let created = next_event(&mut alice).await;
    next_event(&mut bob).await;
    let message_id = created["message"]["id"].as_str().unwrap().to_string();

    send(
        &mut bob,
        json!({ "type": "delete_message", "chatId": chat_id, "messageId": message_id, "scope": "for_self" }),
    )
    .await;
    let deleted = next_event(&mut bob).await;
    assert_eq!(deleted["type"], "message_deleted");
    assert_eq!(deleted["scope"], "for_self");

    send(&mut alice, json!({ "type": "ping" })).await;
    assert_eq!(next_event(&mut alice).await["type"], "pong");
}

#[tokio::test]
async fn removed_participants_stop_receiving_events() {
    let app = TestApp::new().await;
    let chat_id = group(&app.state.chat_service, "alice", &["bob", "carol"]).await;
    let addr = app.spawn().await;

    let mut alice = connect(addr, "/api/ws", Some(&app.token("alice"))).await;
    let mut carol = connect(addr, "/api/ws", Some(&app.token("carol"))).await;
    next_event(&mut alice).await;
    next_event(&mut carol).await;

    app.state
        .chat_service
        .remove_participant(&chat_id, "carol", "alice")
        .await
        .unwrap();

    send(&mut alice, json!({ "type": "send_message", "chatId": chat_id, "content": "carol is gone" })).await;
    assert_eq!(next_event(&mut alice).await["type"], "message_created");

    send(&mut carol, json!({ "type": "ping" })).await;
    assert_eq!(next_event(&mut carol).await["type"], "pong");
}

#[tokio::test]
async fn silent_clients_are_closed_as_idle() {
    let realtime = RealtimeConfig {
        client_timeout_seconds: 1,
        heartbeat_interval_seconds: 30,
        ..RealtimeConfig::default()
    };
    let app = TestApp::with_realtime(realtime).await;
    let addr = app.spawn().await;

    let mut client = connect(addr, "/api/ws", Some(&app.token("alice"))).await;
    assert_eq!(next_event(&mut client).await["type"], "connection_ack");

    assert_eq!(close_code(&mut client).await, 4000);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(app.state.registry.connection_count(), 0);
}

#[tokio::test]
async fn read_receipts_and_unsends_reach_both_sides() {
    let app = TestApp::new().await;
    let chat_id = group(&app.state.chat_service, "alice", &["bob"]).await;
    let addr = app.spawn().await;

    let mut alice = connect(addr, "/api/ws", Some(&app.token("alice"))).await;
    let mut bob = connect(addr, "/api/ws", Some(&app.token("bob"))).await;
    next_event(&mut alice).await;
    next_event(&mut bob).await;

    send(&mut alice, json!({ "type": "send_message", "chatId": chat_id, "content": "see this?" })).await;
    let created = next_event(&mut alice).await;
    assert_eq!(next_event(&mut bob).await["type"], "message_created");
    let message_id = created["message"]["id"].as_str().unwrap().to_string();

    send(&mut bob, json!({ "type": "mark_read", "chatId": chat_id, "messageId": message_id })).await;
    let receipt = next_event(&mut alice).await;
    assert_eq!(receipt["type"], "read_receipt");
    assert_eq!(receipt["messageId"], message_id.as_str());
    assert_eq!(receipt["userId"], "bob");
    assert_eq!(next_event(&mut bob).await["type"], "read_receipt");

    send(&mut alice, json!({ "type": "unsend_message", "chatId": chat_id, "messageId": message_id })).await;
    for client in [&mut alice, &mut bob] {
        let unsent = next_event(client).await;
        assert_eq!(unsent["type"], "message_unsent");
        assert_eq!(unsent["messageId"], message_id.as_str());
    }
}
