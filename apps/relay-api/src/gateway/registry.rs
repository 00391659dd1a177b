//! Presence registry: the bidirectional connection ↔ identity index.
//!
//! Both directions live behind one `parking_lot::Mutex`, so every operation
//! observes them as exact inverses of each other.

use std::collections::HashMap;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::config::DuplicateLoginPolicy;

use super::session::ConnectionId;

/// Returned by [`PresenceRegistry::register`] under [`DuplicateLoginPolicy::Reject`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{identity} is already connected")]
pub struct DuplicateIdentity {
    pub identity: String,
}

/// The two maps disagree. Indicates a bug in the registry itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryInvariantViolation {
    #[error("connection {connection} maps to {identity}, which is not online")]
    MissingIdentity {
        connection: ConnectionId,
        identity: String,
    },
    #[error("identity {identity} maps to {connection}, which maps elsewhere")]
    MismatchedConnection {
        identity: String,
        connection: ConnectionId,
    },
    #[error("{connections} connections but {identities} identities")]
    SizeMismatch {
        connections: usize,
        identities: usize,
    },
}

#[derive(Default)]
struct Maps {
    by_connection: HashMap<ConnectionId, String>,
    /// Insertion order is registration order.
    by_identity: IndexMap<String, ConnectionId>,
}

impl Maps {
    fn verify(&self) -> Result<(), RegistryInvariantViolation> {
        if self.by_connection.len() != self.by_identity.len() {
            return Err(RegistryInvariantViolation::SizeMismatch {
                connections: self.by_connection.len(),
                identities: self.by_identity.len(),
            });
        }
        for (connection, identity) in &self.by_connection {
            if self.by_identity.get(identity) != Some(connection) {
                return Err(RegistryInvariantViolation::MissingIdentity {
                    connection: connection.clone(),
                    identity: identity.clone(),
                });
            }
        }
        for (identity, connection) in &self.by_identity {
            if self.by_connection.get(connection) != Some(identity) {
                return Err(RegistryInvariantViolation::MismatchedConnection {
                    identity: identity.clone(),
                    connection: connection.clone(),
                });
            }
        }
        Ok(())
    }

    fn debug_verify(&self) {
        if cfg!(debug_assertions) {
            if let Err(violation) = self.verify() {
                tracing::error!(%violation, "presence registry invariant violated");
                debug_assert!(false, "presence registry invariant violated: {violation}");
            }
        }
    }
}

/// Who is online, and on which connection.
pub struct PresenceRegistry {
    maps: Mutex<Maps>,
    policy: DuplicateLoginPolicy,
}

impl PresenceRegistry {
    pub fn new(policy: DuplicateLoginPolicy) -> Self {
        Self {
            maps: Mutex::new(Maps::default()),
            policy,
        }
    }

    /// Bind `connection` to `identity`.
    ///
    /// If the identity is already online on another connection, the policy
    /// decides: `Evict` removes the old binding and returns the old
    /// connection so the caller can close it; `Reject` leaves the registry
    /// untouched and fails. A superseding registration moves the identity to
    /// the end of the snapshot order.
    pub fn register(
        &self,
        connection: ConnectionId,
        identity: String,
    ) -> Result<Option<ConnectionId>, DuplicateIdentity> {
        let mut maps = self.maps.lock();

        if let Some(existing) = maps.by_identity.get(&identity) {
            if *existing == connection {
                return Ok(None);
            }
            if self.policy == DuplicateLoginPolicy::Reject {
                return Err(DuplicateIdentity { identity });
            }
        }

        let evicted = maps.by_identity.shift_remove(&identity);
        if let Some(old) = &evicted {
            maps.by_connection.remove(old);
        }
        if let Some(previous) = maps.by_connection.insert(connection.clone(), identity.clone()) {
            maps.by_identity.shift_remove(&previous);
        }
        maps.by_identity.insert(identity, connection);

        maps.debug_verify();
        Ok(evicted)
    }

    /// Remove `connection`, returning the identity it freed. Safe to call
    /// more than once; later calls return `None`.
    pub fn unregister(&self, connection: &ConnectionId) -> Option<String> {
        let mut maps = self.maps.lock();
        let identity = maps.by_connection.remove(connection)?;

        let bound = maps.by_identity.get(&identity).cloned();
        if bound.as_ref() != Some(connection) {
            tracing::error!(
                %connection,
                %identity,
                ?bound,
                "presence registry invariant violated on unregister"
            );
            debug_assert!(false, "identity {identity} not bound to {connection}");
            return None;
        }
        maps.by_identity.shift_remove(&identity);

        maps.debug_verify();
        Some(identity)
    }

    /// The connection currently bound to `identity`.
    pub fn resolve(&self, identity: &str) -> Option<ConnectionId> {
        self.maps.lock().by_identity.get(identity).cloned()
    }

    /// All online identities, in registration order.
    pub fn snapshot(&self) -> Vec<String> {
        self.maps.lock().by_identity.keys().cloned().collect()
    }

    pub fn is_online(&self, identity: &str) -> bool {
        self.maps.lock().by_identity.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.maps.lock().by_connection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check that both maps are exact inverses.
    pub fn check_invariants(&self) -> Result<(), RegistryInvariantViolation> {
        self.maps.lock().verify()
    }
}
