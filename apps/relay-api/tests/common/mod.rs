use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use relay_api::config::{parse_users, Config, DuplicateLoginPolicy};
use relay_api::AppState;

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const TEST_SECRET: &str = "relay-test-secret";

/// Config with the dev user table and no environment lookups.
pub fn test_config() -> Config {
    Config {
        jwt_secret: TEST_SECRET.to_string(),
        port: 0,
        token_ttl_secs: 3600,
        users: parse_users("alice:1234,bob:abcd,charlie:pass"),
        cors_origin: None,
        duplicate_login: DuplicateLoginPolicy::Evict,
        notify_undelivered: false,
    }
}

pub fn test_state() -> AppState {
    AppState::new(test_config())
}

/// Build the full application router wired to a fresh test state.
pub fn test_app() -> (Router, AppState) {
    let state = test_state();
    let app = relay_api::routes::router().with_state(state.clone());
    (app, state)
}

/// Start an actual TCP server for WebSocket testing. The server runs in the
/// background.
pub async fn start_ws_server(state: AppState) -> SocketAddr {
    let app = relay_api::routes::router().with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

/// Log in over HTTP and return the bearer token.
pub async fn login(addr: SocketAddr, username: &str, password: &str) -> String {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/api/v1/auth/login"))
        .json(&serde_json::json!({ "username": username, "password": password }))
        .send()
        .await
        .expect("login request");
    assert!(resp.status().is_success(), "login failed: {}", resp.status());

    let body: Value = resp.json().await.expect("parse login response");
    body["token"].as_str().expect("token present").to_string()
}

/// Open a gateway socket without identifying.
pub async fn connect(addr: SocketAddr) -> Ws {
    let url = format!("ws://{addr}/gateway");
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");
    ws
}

pub async fn send_json(ws: &mut Ws, value: Value) {
    ws.send(tungstenite::Message::Text(value.to_string().into()))
        .await
        .expect("ws send");
}

pub async fn identify(ws: &mut Ws, token: &str) {
    send_json(ws, serde_json::json!({ "op": 2, "d": { "token": token } })).await;
}

/// Connect, IDENTIFY, and consume READY. Returns the socket and the READY frame.
pub async fn connect_and_identify(addr: SocketAddr, token: &str) -> (Ws, Value) {
    let mut ws = connect(addr).await;
    identify(&mut ws, token).await;

    let ready = next_frame(&mut ws).await;
    assert_eq!(ready["op"], 0, "READY should be op=0 (DISPATCH)");
    assert_eq!(ready["t"], "READY");
    (ws, ready)
}

/// Log in and connect in one step.
pub async fn join(addr: SocketAddr, username: &str, password: &str) -> Ws {
    let token = login(addr, username, password).await;
    connect_and_identify(addr, &token).await.0
}

pub async fn send_event(ws: &mut Ws, name: &str, data: Value) {
    send_json(ws, serde_json::json!({ "op": 0, "t": name, "d": data })).await;
}

/// Next JSON text frame, skipping pings.
pub async fn next_frame(ws: &mut Ws) -> Value {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for frame")
            .expect("stream ended")
            .expect("ws read error");

        match msg {
            tungstenite::Message::Text(text) => {
                return serde_json::from_str(&text).expect("parse frame");
            }
            tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_) => continue,
            other => panic!("Expected text frame, got: {other:?}"),
        }
    }
}

/// Next DISPATCH frame; asserts its event name and returns `d`.
pub async fn expect_event(ws: &mut Ws, name: &str) -> Value {
    let frame = next_frame(ws).await;
    assert_eq!(frame["op"], 0, "expected DISPATCH, got {frame}");
    assert_eq!(frame["t"], name, "unexpected event: {frame}");
    frame["d"].clone()
}

/// Prove nothing else is queued: a heartbeat must be answered before any
/// other frame arrives.
pub async fn expect_nothing_pending(ws: &mut Ws) {
    send_json(ws, serde_json::json!({ "op": 1, "d": { "seq": 42 } })).await;
    let frame = next_frame(ws).await;
    assert_eq!(frame["op"], 6, "expected HEARTBEAT_ACK, got {frame}");
    assert_eq!(frame["d"]["ack"], 42);
}

/// Wait for the server to close the socket and return the close code.
pub async fn expect_close(ws: &mut Ws) -> u16 {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for close");

        match msg {
            Some(Ok(tungstenite::Message::Close(Some(frame)))) => return frame.code.into(),
            Some(Ok(tungstenite::Message::Close(None))) | None => return 1005,
            Some(Ok(_)) => continue,
            Some(Err(e)) => panic!("ws error before close: {e}"),
        }
    }
}

/// Poll until the gateway reports exactly `expected` online.
pub async fn wait_for_online(state: &AppState, expected: &[&str]) {
    for _ in 0..50 {
        if state.gateway.online() == expected {
            return;
        }
        time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(state.gateway.online(), expected);
}
