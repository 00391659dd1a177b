//! Per-connection gateway session state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use super::events::{ChatEvent, GatewayMessage, InboundEvent};
use super::fanout::{BroadcastPayload, Outbound};
use super::router::RouteError;
use super::Gateway;

/// Opaque handle for one live connection (`conn_` prefixed ULID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(relay_common::prefixed_ulid(relay_common::id::prefix::CONNECTION))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unauthenticated,
    Active,
    /// Terminal.
    Closed,
}

/// What a session's fan-out receiver yields.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(ChatEvent),
    /// A newer login for the same identity took over this session.
    Superseded,
}

/// State for a single gateway connection.
///
/// Dropping an active session unregisters it and announces the departure,
/// so a cancelled connection task never leaves presence behind.
pub struct GatewaySession {
    connection_id: ConnectionId,
    identity: String,
    state: ConnectionState,
    /// Monotonically increasing sequence number for dispatch events.
    seq: AtomicU64,
    events: broadcast::Receiver<Arc<BroadcastPayload>>,
    gateway: Gateway,
}

impl GatewaySession {
    pub(super) fn new(
        gateway: Gateway,
        identity: String,
        events: broadcast::Receiver<Arc<BroadcastPayload>>,
    ) -> Self {
        Self {
            connection_id: ConnectionId::generate(),
            identity,
            state: ConnectionState::Unauthenticated,
            seq: AtomicU64::new(0),
            events,
            gateway,
        }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub(super) fn activate(&mut self) {
        debug_assert_eq!(self.state, ConnectionState::Unauthenticated);
        self.state = ConnectionState::Active;
    }

    /// Mark a session that never became active as closed.
    pub(super) fn abandon(&mut self) {
        if self.state == ConnectionState::Unauthenticated {
            self.state = ConnectionState::Closed;
        }
    }

    /// Get the next sequence number for a dispatch event.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Wrap an event in a DISPATCH frame with this session's next seq.
    pub fn frame(&self, event: &ChatEvent) -> GatewayMessage {
        GatewayMessage::dispatch(event.event_name(), self.next_seq(), event.payload())
    }

    /// Route an inbound event from this connection.
    pub fn handle(&self, event: InboundEvent) -> Result<(), RouteError> {
        self.gateway.router().route(self, event)
    }

    /// Wait for the next delivery addressed to this connection. Returns
    /// `None` once the hub is gone or the session is closed.
    pub async fn next(&mut self) -> Option<Delivery> {
        loop {
            if self.state == ConnectionState::Closed {
                return None;
            }
            match self.events.recv().await {
                Ok(payload) => {
                    if let Some(delivery) = self.accept(&payload) {
                        return Some(delivery);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(
                        connection = %self.connection_id,
                        skipped = n,
                        "gateway session lagged behind broadcast"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`next`](Self::next).
    pub fn try_next(&mut self) -> Option<Delivery> {
        loop {
            if self.state == ConnectionState::Closed {
                return None;
            }
            match self.events.try_recv() {
                Ok(payload) => {
                    if let Some(delivery) = self.accept(&payload) {
                        return Some(delivery);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!(
                        connection = %self.connection_id,
                        skipped = n,
                        "gateway session lagged behind broadcast"
                    );
                }
                Err(_) => return None,
            }
        }
    }

    fn accept(&self, payload: &BroadcastPayload) -> Option<Delivery> {
        if !payload.target.includes(&self.connection_id) {
            return None;
        }
        match &payload.outbound {
            Outbound::Event(event) => Some(Delivery::Event(event.clone())),
            Outbound::Evict => Some(Delivery::Superseded),
        }
    }

    /// Close the session: unregister and announce the departure. Idempotent.
    pub fn close(&mut self) {
        match self.state {
            ConnectionState::Closed => {}
            ConnectionState::Unauthenticated => self.state = ConnectionState::Closed,
            ConnectionState::Active => {
                self.state = ConnectionState::Closed;
                let freed = self.gateway.disconnect(self);
                tracing::info!(
                    connection = %self.connection_id,
                    identity = %self.identity,
                    announced = freed.is_some(),
                    "gateway session closed"
                );
            }
        }
    }
}

impl Drop for GatewaySession {
    fn drop(&mut self) {
        self.close();
    }
}
