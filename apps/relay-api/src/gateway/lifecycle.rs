//! Join/leave notices and online-user snapshots.

use super::events::ChatEvent;
use super::fanout::{GatewayBroadcast, Target};
use super::registry::PresenceRegistry;
use super::session::ConnectionId;
use super::now_timestamp;

pub struct LifecycleNotifier<'a> {
    registry: &'a PresenceRegistry,
    broadcast: &'a GatewayBroadcast,
}

impl<'a> LifecycleNotifier<'a> {
    pub fn new(registry: &'a PresenceRegistry, broadcast: &'a GatewayBroadcast) -> Self {
        Self { registry, broadcast }
    }

    /// Announce a freshly registered connection: a notice to everyone else,
    /// then the online list to everyone including the newcomer.
    pub fn announce_join(&self, connection: &ConnectionId, identity: &str) {
        self.broadcast.send(
            Target::AllExcept(connection.clone()),
            ChatEvent::SystemNotice {
                text: format!("{identity} has joined the chat"),
                timestamp: now_timestamp(),
            },
        );
        self.send_snapshot(Target::All);
    }

    /// Announce a departure. Does nothing unless `freed` carries the identity
    /// the registry just released.
    pub fn announce_leave(&self, connection: &ConnectionId, freed: Option<&str>) {
        let Some(identity) = freed else {
            return;
        };
        self.broadcast.send(
            Target::AllExcept(connection.clone()),
            ChatEvent::SystemNotice {
                text: format!("{identity} has left the chat"),
                timestamp: now_timestamp(),
            },
        );
        self.send_snapshot(Target::AllExcept(connection.clone()));
    }

    fn send_snapshot(&self, target: Target) {
        self.broadcast.send(
            target,
            ChatEvent::PresenceSnapshot {
                online: self.registry.snapshot(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DuplicateLoginPolicy;
    use crate::gateway::fanout::Outbound;

    #[test]
    fn join_sends_notice_to_others_then_snapshot_to_all() {
        let registry = PresenceRegistry::new(DuplicateLoginPolicy::Evict);
        let broadcast = GatewayBroadcast::new();
        let mut rx = broadcast.subscribe();
        let bob = ConnectionId::from("conn_bob");

        registry.register(ConnectionId::from("conn_alice"), "alice".into()).unwrap();
        registry.register(bob.clone(), "bob".into()).unwrap();
        LifecycleNotifier::new(&registry, &broadcast).announce_join(&bob, "bob");

        let notice = rx.try_recv().unwrap();
        assert_eq!(notice.target, Target::AllExcept(bob.clone()));
        match &notice.outbound {
            Outbound::Event(ChatEvent::SystemNotice { text, .. }) => {
                assert_eq!(text, "bob has joined the chat");
            }
            other => panic!("unexpected payload: {other:?}"),
        }

        let snapshot = rx.try_recv().unwrap();
        assert_eq!(snapshot.target, Target::All);
        match &snapshot.outbound {
            Outbound::Event(ChatEvent::PresenceSnapshot { online }) => {
                assert_eq!(online, &vec!["alice".to_string(), "bob".to_string()]);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn leave_without_freed_identity_is_silent() {
        let registry = PresenceRegistry::new(DuplicateLoginPolicy::Evict);
        let broadcast = GatewayBroadcast::new();
        let mut rx = broadcast.subscribe();

        LifecycleNotifier::new(&registry, &broadcast)
            .announce_leave(&ConnectionId::from("conn_ghost"), None);

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn leave_excludes_departed_connection() {
        let registry = PresenceRegistry::new(DuplicateLoginPolicy::Evict);
        let broadcast = GatewayBroadcast::new();
        let mut rx = broadcast.subscribe();
        let bob = ConnectionId::from("conn_bob");

        registry.register(ConnectionId::from("conn_alice"), "alice".into()).unwrap();
        LifecycleNotifier::new(&registry, &broadcast).announce_leave(&bob, Some("bob"));

        let notice = rx.try_recv().unwrap();
        assert_eq!(notice.target, Target::AllExcept(bob.clone()));
        let snapshot = rx.try_recv().unwrap();
        assert_eq!(snapshot.target, Target::AllExcept(bob));
        match &snapshot.outbound {
            Outbound::Event(ChatEvent::PresenceSnapshot { online }) => {
                assert_eq!(online, &vec!["alice".to_string()]);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
