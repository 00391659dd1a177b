//! Delivery policy for events sent by active connections.

use super::events::{ChatEvent, DecodeError, InboundEvent};
use super::fanout::{GatewayBroadcast, Target};
use super::registry::PresenceRegistry;
use super::session::{ConnectionState, GatewaySession};
use super::timestamp_or_now;

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("connection is {0:?}, not active")]
    NotActive(ConnectionState),
    #[error("connection was superseded by a newer login")]
    Superseded,
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

pub struct EventRouter<'a> {
    registry: &'a PresenceRegistry,
    broadcast: &'a GatewayBroadcast,
    notify_undelivered: bool,
}

impl<'a> EventRouter<'a> {
    pub fn new(
        registry: &'a PresenceRegistry,
        broadcast: &'a GatewayBroadcast,
        notify_undelivered: bool,
    ) -> Self {
        Self {
            registry,
            broadcast,
            notify_undelivered,
        }
    }

    /// Deliver one event from `origin`. Sender identity always comes from the
    /// session, never from the payload.
    pub fn route(&self, origin: &GatewaySession, event: InboundEvent) -> Result<(), RouteError> {
        if origin.state() != ConnectionState::Active {
            return Err(RouteError::NotActive(origin.state()));
        }
        if self.registry.resolve(origin.identity()).as_ref() != Some(origin.connection_id()) {
            return Err(RouteError::Superseded);
        }
        let sender = origin.identity();

        match event {
            InboundEvent::SendMessage(payload) => {
                self.broadcast.send(
                    Target::All,
                    ChatEvent::Broadcast {
                        sender: sender.to_string(),
                        text: payload.text,
                        timestamp: timestamp_or_now(payload.timestamp),
                    },
                );
            }
            InboundEvent::PrivateMessage(mut payload) => {
                let attachment = payload.take_attachment();
                let timestamp = timestamp_or_now(payload.timestamp.take());

                match self.registry.resolve(&payload.recipient) {
                    Some(connection) => self.broadcast.send(
                        Target::Only(connection),
                        ChatEvent::PrivateMessage {
                            sender: sender.to_string(),
                            recipient: payload.recipient,
                            text: payload.text,
                            attachment,
                            timestamp,
                        },
                    ),
                    None => {
                        tracing::debug!(
                            connection = %origin.connection_id(),
                            recipient = %payload.recipient,
                            "private message recipient offline; dropped"
                        );
                        if self.notify_undelivered {
                            self.broadcast.send(
                                Target::Only(origin.connection_id().clone()),
                                ChatEvent::PrivateMessageUndelivered {
                                    recipient: payload.recipient,
                                    timestamp,
                                },
                            );
                        }
                    }
                }
            }
            InboundEvent::Typing(payload) => {
                self.broadcast.send(
                    Target::AllExcept(origin.connection_id().clone()),
                    ChatEvent::TypingStatus {
                        user: sender.to_string(),
                        is_typing: payload.is_typing(),
                    },
                );
            }
            InboundEvent::AddReaction(payload) => {
                self.broadcast.send(
                    Target::All,
                    ChatEvent::ReactionAdded {
                        message_index: payload.message_index,
                        emoji: payload.emoji,
                        user: sender.to_string(),
                    },
                );
            }
        }
        Ok(())
    }
}
