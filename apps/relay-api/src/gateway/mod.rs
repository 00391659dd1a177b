//! The chat gateway: admission, presence, fan-out, and the WebSocket server.

pub mod events;
pub mod fanout;
pub mod identity;
pub mod lifecycle;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;

use crate::config::DuplicateLoginPolicy;

use fanout::GatewayBroadcast;
use identity::{AuthError, IdentityVerifier};
use lifecycle::LifecycleNotifier;
use registry::{DuplicateIdentity, PresenceRegistry};
use router::EventRouter;
use session::GatewaySession;

/// Shared gateway core. Cloneable; store in AppState.
#[derive(Clone)]
pub struct Gateway {
    registry: Arc<PresenceRegistry>,
    broadcast: GatewayBroadcast,
    verifier: Arc<dyn IdentityVerifier>,
    /// Held across a membership change and its announcement, so snapshots
    /// hit the fan-out channel in the same order the registry changed.
    membership: Arc<Mutex<()>>,
    notify_undelivered: bool,
}

impl Gateway {
    pub fn new(
        verifier: Arc<dyn IdentityVerifier>,
        policy: DuplicateLoginPolicy,
        notify_undelivered: bool,
    ) -> Self {
        Self {
            registry: Arc::new(PresenceRegistry::new(policy)),
            broadcast: GatewayBroadcast::new(),
            verifier,
            membership: Arc::new(Mutex::new(())),
            notify_undelivered,
        }
    }

    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    /// Identities currently online, in join order.
    pub fn online(&self) -> Vec<String> {
        self.registry.snapshot()
    }

    /// Verify a connection's proof of identity.
    pub async fn admit(&self, proof: Option<&str>) -> Result<String, AuthError> {
        identity::admit(self.verifier.as_ref(), proof).await
    }

    /// Register an admitted identity and announce it.
    ///
    /// The session subscribes to the fan-out hub before registering so its
    /// own join snapshot is the first thing it receives. Under the evict
    /// policy the superseded connection is told to close; it will not
    /// announce a departure because it no longer owns the identity.
    pub fn connect(&self, identity: String) -> Result<GatewaySession, DuplicateIdentity> {
        let mut session = GatewaySession::new(self.clone(), identity, self.broadcast.subscribe());
        let _membership = self.membership.lock();

        let evicted = match self
            .registry
            .register(session.connection_id().clone(), session.identity().to_string())
        {
            Ok(evicted) => evicted,
            Err(err) => {
                session.abandon();
                return Err(err);
            }
        };
        session.activate();

        if let Some(old) = evicted {
            tracing::info!(
                identity = %session.identity(),
                superseded = %old,
                "duplicate login superseded prior connection"
            );
            self.broadcast.evict(old);
        }

        self.lifecycle()
            .announce_join(session.connection_id(), session.identity());

        tracing::info!(
            connection = %session.connection_id(),
            identity = %session.identity(),
            online = self.registry.len(),
            "gateway session established"
        );
        Ok(session)
    }

    /// Unregister `session` and announce the departure if it still owned its
    /// identity.
    pub(crate) fn disconnect(&self, session: &GatewaySession) -> Option<String> {
        let _membership = self.membership.lock();
        let freed = self.registry.unregister(session.connection_id());
        self.lifecycle()
            .announce_leave(session.connection_id(), freed.as_deref());
        freed
    }

    pub(crate) fn lifecycle(&self) -> LifecycleNotifier<'_> {
        LifecycleNotifier::new(&self.registry, &self.broadcast)
    }

    pub(crate) fn router(&self) -> EventRouter<'_> {
        EventRouter::new(&self.registry, &self.broadcast, self.notify_undelivered)
    }
}

/// Wall-clock timestamp used when a sender omits one.
pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn timestamp_or_now(timestamp: Option<String>) -> String {
    timestamp
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(now_timestamp)
}
