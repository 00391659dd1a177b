//! WebSocket upgrade handler and per-connection event loop.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::time;

use crate::AppState;

use super::events::{
    ClientMessage, EventName, GatewayMessage, HeartbeatPayload, IdentifyPayload, InboundEvent,
    OP_DISPATCH, OP_HEARTBEAT, OP_IDENTIFY,
};
use super::router::RouteError;
use super::session::{Delivery, GatewaySession};

/// Close codes (4000-range for application-level).
const CLOSE_UNKNOWN_ERROR: u16 = 4000;
const CLOSE_UNKNOWN_OPCODE: u16 = 4001;
const CLOSE_DECODE_ERROR: u16 = 4002;
const CLOSE_NOT_AUTHENTICATED: u16 = 4003;
const CLOSE_AUTH_FAILED: u16 = 4004;
const CLOSE_ALREADY_CONNECTED: u16 = 4005;
const CLOSE_SUPERSEDED: u16 = 4006;
const CLOSE_SESSION_TIMEOUT: u16 = 4009;

/// Timeout for receiving IDENTIFY after connection (seconds).
const IDENTIFY_TIMEOUT_SECS: u64 = 10;

/// Heartbeat interval sent to clients in the READY payload (ms).
pub const HEARTBEAT_INTERVAL_MS: u64 = 41250;

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Step 1: Wait for IDENTIFY within timeout. The connection is
    // unauthenticated until it arrives and verifies.
    let identify = time::timeout(
        Duration::from_secs(IDENTIFY_TIMEOUT_SECS),
        wait_for_identify(&mut ws_rx),
    )
    .await;

    let payload = match identify {
        Ok(Ok(payload)) => payload,
        Ok(Err((code, reason))) => {
            tracing::debug!(%reason, "initial handshake failed");
            let _ = send_close(&mut ws_tx, code, reason).await;
            return;
        }
        Err(_timeout) => {
            let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Handshake timeout").await;
            return;
        }
    };

    // Step 2: Identity binding. Nothing is registered on failure.
    let identity = match state.gateway.admit(payload.token.as_deref()).await {
        Ok(identity) => identity,
        Err(err) => {
            tracing::debug!(%err, "admission refused");
            let _ = send_close(&mut ws_tx, CLOSE_AUTH_FAILED, &err.to_string()).await;
            return;
        }
    };

    // Step 3: Register and announce.
    let mut session = match state.gateway.connect(identity) {
        Ok(session) => session,
        Err(err) => {
            tracing::debug!(%err, "duplicate login rejected");
            let _ = send_close(&mut ws_tx, CLOSE_ALREADY_CONNECTED, &err.to_string()).await;
            return;
        }
    };

    let ready = GatewayMessage::dispatch(
        EventName::READY,
        session.next_seq(),
        serde_json::json!({
            "connection_id": session.connection_id(),
            "user": { "username": session.identity() },
            "heartbeat_interval": HEARTBEAT_INTERVAL_MS,
        }),
    );

    if send_json(&mut ws_tx, &ready).await.is_ok() {
        run_session(&mut session, ws_tx, ws_rx).await;
    }

    session.close();
}

/// Read frames until the client's first meaningful message, which must be
/// IDENTIFY.
async fn wait_for_identify(ws_rx: &mut WsStream) -> Result<IdentifyPayload, (u16, &'static str)> {
    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t,
            Ok(Message::Close(_)) => return Err((CLOSE_UNKNOWN_ERROR, "client closed")),
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(?e, "ws read error during identify");
                return Err((CLOSE_UNKNOWN_ERROR, "read error"));
            }
        };

        let client_msg: ClientMessage = serde_json::from_str(&text)
            .map_err(|_| (CLOSE_DECODE_ERROR, "Invalid JSON"))?;

        return match client_msg.op {
            OP_IDENTIFY => {
                let payload: IdentifyPayload = if client_msg.d.is_null() {
                    IdentifyPayload::default()
                } else {
                    serde_json::from_value(client_msg.d)
                        .map_err(|_| (CLOSE_DECODE_ERROR, "Invalid identify payload"))?
                };
                Ok(payload)
            }
            _ => Err((CLOSE_NOT_AUTHENTICATED, "Expected IDENTIFY")),
        };
    }
    Err((CLOSE_UNKNOWN_ERROR, "connection closed before identify"))
}

/// Main session event loop: read client events, forward deliveries, enforce heartbeat.
async fn run_session(session: &mut GatewaySession, mut ws_tx: WsSink, mut ws_rx: WsStream) {
    // Heartbeat deadline: client must heartbeat within 1.5× the interval.
    let heartbeat_deadline = Duration::from_millis(HEARTBEAT_INTERVAL_MS * 3 / 2);
    let mut heartbeat_timer = time::interval(heartbeat_deadline);
    heartbeat_timer.tick().await; // First tick fires immediately; skip it.
    let mut got_heartbeat = true;

    loop {
        tokio::select! {
            // Client sends us a message.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let client_msg: ClientMessage = match serde_json::from_str(&text) {
                            Ok(m) => m,
                            Err(_) => {
                                let _ = send_close(&mut ws_tx, CLOSE_DECODE_ERROR, "Invalid JSON").await;
                                break;
                            }
                        };

                        match client_msg.op {
                            OP_DISPATCH => {
                                let routed = InboundEvent::decode(client_msg.t.as_deref(), client_msg.d)
                                    .map_err(RouteError::from)
                                    .and_then(|event| session.handle(event));
                                if let Err(err) = routed {
                                    tracing::debug!(
                                        %err,
                                        connection = %session.connection_id(),
                                        "rejected client event"
                                    );
                                    let code = match err {
                                        RouteError::Superseded => CLOSE_SUPERSEDED,
                                        _ => CLOSE_DECODE_ERROR,
                                    };
                                    let _ = send_close(&mut ws_tx, code, &err.to_string()).await;
                                    break;
                                }
                            }
                            OP_HEARTBEAT => {
                                got_heartbeat = true;
                                let payload: HeartbeatPayload =
                                    serde_json::from_value(client_msg.d).unwrap_or(HeartbeatPayload { seq: 0 });
                                let ack = GatewayMessage::heartbeat_ack(payload.seq);
                                if send_json(&mut ws_tx, &ack).await.is_err() {
                                    break;
                                }
                            }
                            OP_IDENTIFY => {
                                // Already identified.
                                let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Already identified").await;
                                break;
                            }
                            _ => {
                                let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_OPCODE, "Unknown opcode").await;
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection = %session.connection_id(), "ws read error");
                        break;
                    }
                    Some(Ok(_)) => continue,
                }
            }

            // Delivery from the fan-out hub.
            delivery = session.next() => {
                match delivery {
                    Some(Delivery::Event(event)) => {
                        let msg = session.frame(&event);
                        if send_json(&mut ws_tx, &msg).await.is_err() {
                            break;
                        }
                    }
                    Some(Delivery::Superseded) => {
                        let _ = send_close(&mut ws_tx, CLOSE_SUPERSEDED, "Session superseded").await;
                        break;
                    }
                    None => break,
                }
            }

            // Heartbeat timeout check.
            _ = heartbeat_timer.tick() => {
                if !got_heartbeat {
                    tracing::debug!(
                        connection = %session.connection_id(),
                        "heartbeat timeout, closing connection"
                    );
                    let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Heartbeat timeout").await;
                    break;
                }
                got_heartbeat = false;
            }
        }
    }
}

async fn send_json(ws_tx: &mut WsSink, msg: &GatewayMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).map_err(axum::Error::new)?;
    ws_tx.send(Message::Text(json.into())).await
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(axum::extract::ws::CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
