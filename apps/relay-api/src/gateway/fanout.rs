//! Broadcast hub for dispatching chat events to connected sessions.
//!
//! Uses a single `tokio::sync::broadcast` channel. Every payload carries a
//! [`Target`]; each session subscribes once and drops payloads that are not
//! addressed to its connection.

use std::sync::Arc;

use tokio::sync::broadcast;

use super::events::ChatEvent;
use super::session::ConnectionId;

/// Capacity of the broadcast channel. Slow receivers that fall behind will
/// skip messages (RecvError::Lagged).
const BROADCAST_CAPACITY: usize = 4096;

/// Which connections a payload is delivered to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    AllExcept(ConnectionId),
    Only(ConnectionId),
}

impl Target {
    pub fn includes(&self, connection: &ConnectionId) -> bool {
        match self {
            Target::All => true,
            Target::AllExcept(excluded) => excluded != connection,
            Target::Only(only) => only == connection,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Outbound {
    Event(ChatEvent),
    /// The addressed connection was superseded by a newer login and must close.
    Evict,
}

/// A payload broadcast to all subscribed sessions.
#[derive(Debug, Clone)]
pub struct BroadcastPayload {
    pub target: Target,
    pub outbound: Outbound,
}

/// The global broadcast hub. Cloneable; store in AppState.
#[derive(Clone)]
pub struct GatewayBroadcast {
    sender: broadcast::Sender<Arc<BroadcastPayload>>,
}

impl GatewayBroadcast {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { sender }
    }

    /// Subscribe to the broadcast channel. Each gateway session calls this
    /// once, before it registers, so it sees its own join snapshot.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<BroadcastPayload>> {
        self.sender.subscribe()
    }

    pub fn dispatch(&self, payload: BroadcastPayload) {
        // send() returns Err if there are no receivers, which is fine.
        let _ = self.sender.send(Arc::new(payload));
    }

    pub fn send(&self, target: Target, event: ChatEvent) {
        self.dispatch(BroadcastPayload {
            target,
            outbound: Outbound::Event(event),
        });
    }

    /// Tell a superseded connection to close.
    pub fn evict(&self, connection: ConnectionId) {
        self.dispatch(BroadcastPayload {
            target: Target::Only(connection),
            outbound: Outbound::Evict,
        });
    }
}

impl Default for GatewayBroadcast {
    fn default() -> Self {
        Self::new()
    }
}
