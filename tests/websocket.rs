//! End-to-end tests over a real WebSocket
//!
//! Starts the relay on an ephemeral port and talks to it the way a client
//! would: read the challenge, sign it, then publish and subscribe.

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use turnstile::auth::{Authenticator, RoleSet};
use turnstile::config::AuthConfig;
use turnstile::event::{Keys, UnsignedEvent};
use turnstile::server::{run_websocket_server, WsState, MAX_SUBSCRIPTIONS};
use turnstile::storage::{MemoryRoleStore, RoleStore};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RELAY: &str = "ws://localhost:6969";

async fn spawn_relay(save: &str, query: &str) -> (String, Arc<MemoryRoleStore>) {
    let store = Arc::new(MemoryRoleStore::new());
    let config = AuthConfig {
        enabled: true,
        actions: BTreeMap::from([
            ("save".to_string(), save.to_string()),
            ("query".to_string(), query.to_string()),
        ]),
    };
    let auth = Authenticator::new(&config, RELAY, store.clone()).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = WsState::new(Arc::new(auth));
    tokio::spawn(run_websocket_server(listener, state, std::future::pending()));

    (format!("ws://{}/", addr), store)
}

async fn recv(client: &mut Client) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for relay")
            .expect("connection closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send(client: &mut Client, value: Value) {
    client.send(Message::Text(value.to_string())).await.unwrap();
}

/// Connect and return the client with its challenge
async fn connect(url: &str) -> (Client, String) {
    let (mut client, _) = connect_async(url).await.unwrap();
    let hello = recv(&mut client).await;
    assert_eq!(hello[0], "AUTH");
    let challenge = hello[1].as_str().unwrap().to_string();
    (client, challenge)
}

async fn authenticate(client: &mut Client, keys: &Keys, challenge: &str) -> Value {
    let event = keys
        .sign(UnsignedEvent::auth(
            RELAY,
            challenge,
            chrono::Utc::now().timestamp(),
        ))
        .unwrap();
    send(client, json!(["AUTH", event])).await;
    recv(client).await
}

#[tokio::test]
async fn test_challenge_issued_on_connect() {
    let (url, _store) = spawn_relay("w", "a").await;

    let (_c1, challenge1) = connect(&url).await;
    let (_c2, challenge2) = connect(&url).await;

    assert_eq!(challenge1.len(), 64);
    assert_ne!(challenge1, challenge2);
}

#[tokio::test]
async fn test_unauthenticated_session_is_gated() {
    let (url, _store) = spawn_relay("w", "r").await;
    let (mut client, _challenge) = connect(&url).await;

    let note = Keys::generate()
        .sign(UnsignedEvent::new(1, chrono::Utc::now().timestamp()))
        .unwrap();
    send(&mut client, json!(["EVENT", note])).await;
    let reply = recv(&mut client).await;
    assert_eq!(reply[0], "OK");
    assert_eq!(reply[1], note.id.as_str());
    assert_eq!(reply[2], false);
    assert!(reply[3].as_str().unwrap().starts_with("auth-required:"));

    send(&mut client, json!(["REQ", "sub1", {"kinds": [1]}])).await;
    let reply = recv(&mut client).await;
    assert_eq!(reply, json!(["CLOSED", "sub1", "auth-required: authentication required to query"]));
}

#[tokio::test]
async fn test_auth_failures_are_reported() {
    let (url, _store) = spawn_relay("w", "a").await;
    let (mut client, _challenge) = connect(&url).await;
    let keys = Keys::generate();

    let reply = authenticate(&mut client, &keys, "not-the-challenge").await;
    assert_eq!(reply[0], "OK");
    assert_eq!(reply[2], false);
    assert_eq!(reply[3], "invalid: Wrong challenge");

    send(&mut client, json!(["AUTH", "some junk"])).await;
    let reply = recv(&mut client).await;
    assert_eq!(reply, json!(["OK", "", false, "invalid: malformed authentication event"]));
}

#[tokio::test]
async fn test_writer_publishes_to_subscriber() {
    let (url, store) = spawn_relay("w", "a").await;
    let writer = Keys::generate();
    store
        .set_roles(&writer.public_key(), &RoleSet::parse("w").unwrap())
        .await
        .unwrap();

    // Anyone may query under this policy
    let (mut reader, _) = connect(&url).await;
    send(&mut reader, json!(["REQ", "feed", {"authors": [writer.public_key()]}])).await;
    assert_eq!(recv(&mut reader).await, json!(["EOSE", "feed"]));

    let (mut client, challenge) = connect(&url).await;
    let reply = authenticate(&mut client, &writer, &challenge).await;
    assert_eq!(reply[2], true, "auth rejected: {}", reply);

    let note = writer
        .sign(UnsignedEvent::new(1, chrono::Utc::now().timestamp()).content("hello"))
        .unwrap();
    send(&mut client, json!(["EVENT", note])).await;
    assert_eq!(recv(&mut client).await, json!(["OK", note.id, true, ""]));

    let delivered = recv(&mut reader).await;
    assert_eq!(delivered[0], "EVENT");
    assert_eq!(delivered[1], "feed");
    assert_eq!(delivered[2]["id"], note.id.as_str());
}

#[tokio::test]
async fn test_token_is_scoped_to_its_session() {
    let (url, store) = spawn_relay("w", "a").await;
    let writer = Keys::generate();
    store
        .set_roles(&writer.public_key(), &RoleSet::parse("w").unwrap())
        .await
        .unwrap();

    let (mut first, challenge) = connect(&url).await;
    let reply = authenticate(&mut first, &writer, &challenge).await;
    assert_eq!(reply[2], true);

    // A second connection from the same key has not authenticated yet
    let (mut second, _) = connect(&url).await;
    let note = writer
        .sign(UnsignedEvent::new(1, chrono::Utc::now().timestamp()))
        .unwrap();
    send(&mut second, json!(["EVENT", note])).await;
    let reply = recv(&mut second).await;
    assert_eq!(reply[2], false);
}

#[tokio::test]
async fn test_authenticated_without_role_is_restricted() {
    let (url, _store) = spawn_relay("w", "a").await;
    let (mut client, challenge) = connect(&url).await;
    let keys = Keys::generate();

    let reply = authenticate(&mut client, &keys, &challenge).await;
    assert_eq!(reply[2], true);

    let note = keys
        .sign(UnsignedEvent::new(1, chrono::Utc::now().timestamp()))
        .unwrap();
    send(&mut client, json!(["EVENT", note])).await;
    let reply = recv(&mut client).await;
    assert_eq!(reply[2], false);
    assert_eq!(reply[3], "restricted: not allowed to save");
}

#[tokio::test]
async fn test_protocol_errors_become_notices() {
    let (url, _store) = spawn_relay("a", "a").await;
    let (mut client, _) = connect(&url).await;

    client
        .send(Message::Text("not json".to_string()))
        .await
        .unwrap();
    let reply = recv(&mut client).await;
    assert_eq!(reply[0], "NOTICE");

    send(&mut client, json!(["COUNT", "x"])).await;
    let reply = recv(&mut client).await;
    assert_eq!(reply, json!(["NOTICE", "unknown message type 'COUNT'"]));
}

#[tokio::test]
async fn test_subscription_limit_per_connection() {
    let (url, _store) = spawn_relay("a", "a").await;
    let (mut client, _) = connect(&url).await;

    for i in 0..MAX_SUBSCRIPTIONS {
        let id = format!("sub{}", i);
        send(&mut client, json!(["REQ", id, {"kinds": [1]}])).await;
        assert_eq!(recv(&mut client).await, json!(["EOSE", id]));
    }

    send(&mut client, json!(["REQ", "extra", {"kinds": [1]}])).await;
    let reply = recv(&mut client).await;
    assert_eq!(reply[0], "CLOSED");
    assert_eq!(reply[1], "extra");
    assert!(reply[2].as_str().unwrap().starts_with("error: too many subscriptions"));

    // Closing one frees a slot
    send(&mut client, json!(["CLOSE", "sub0"])).await;
    send(&mut client, json!(["REQ", "extra", {"kinds": [1]}])).await;
    assert_eq!(recv(&mut client).await, json!(["EOSE", "extra"]));
}
