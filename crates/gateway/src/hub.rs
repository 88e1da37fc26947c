//! Delivery hub: fan-out of server events to live connections.

use std::sync::Arc;

use courier_chats::{EventPublisher, MembershipChange, ServerEvent};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, warn};

use crate::registry::{CloseReason, ConnectionRegistry, OutboundFrame};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Connections evicted because their queue was full.
    pub evicted: usize,
    /// Connections found already gone.
    pub dropped: usize,
}

pub struct DeliveryHub {
    registry: Arc<ConnectionRegistry>,
}

impl DeliveryHub {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Serialize once and enqueue on every recipient without waiting.
    pub fn deliver(&self, chat_id: &str, event: &ServerEvent, excluded_user: Option<&str>) -> DeliveryReport {
        let frame: OutboundFrame = match event.to_frame() {
            Ok(frame) => frame.into(),
            Err(err) => {
                error!(chat_id, event = event.event_type(), error = %err, "failed to serialize event");
                return DeliveryReport::default();
            }
        };

        let mut report = DeliveryReport::default();

        for handle in self.registry.handles_for(chat_id) {
            if excluded_user.is_some_and(|user| user == handle.user_id) {
                continue;
            }

            match handle.try_send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        chat_id,
                        registration_id = %handle.registration_id,
                        user_id = %handle.user_id,
                        "outbound queue full, evicting slow consumer"
                    );
                    self.registry.evict(handle.registration_id, CloseReason::SlowConsumer);
                    report.evicted += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    self.registry.unregister(handle.registration_id);
                    report.dropped += 1;
                }
            }
        }

        debug!(
            chat_id,
            event = event.event_type(),
            delivered = report.delivered,
            evicted = report.evicted,
            dropped = report.dropped,
            "event delivered"
        );
        report
    }
}

impl EventPublisher for DeliveryHub {
    fn publish(&self, chat_id: &str, event: &ServerEvent) {
        self.deliver(chat_id, event, None);
    }

    fn publish_except(&self, chat_id: &str, event: &ServerEvent, excluded_user: &str) {
        self.deliver(chat_id, event, Some(excluded_user));
    }

    fn membership_changed(&self, change: MembershipChange) {
        match change {
            MembershipChange::Joined { chat_id, user_id } => {
                self.registry.add_participant(&chat_id, &user_id);
            }
            MembershipChange::Left { chat_id, user_id } => {
                self.registry.remove_participant(&chat_id, &user_id);
            }
            MembershipChange::Closed { chat_id } => {
                self.registry.close_chat(&chat_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ChatScope, ConnectionHandle};
    use tokio::sync::mpsc;

    fn hub() -> DeliveryHub {
        let registry = Arc::new(ConnectionRegistry::new(8));
        registry.sync_participants("c1", ["alice".to_string(), "bob".to_string()]);
        DeliveryHub::new(registry)
    }

    fn connect(
        hub: &DeliveryHub,
        user: &str,
        capacity: usize,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        let (handle, _close) = ConnectionHandle::new(user, ChatScope::Global, tx);
        let handle = Arc::new(handle);
        hub.registry().register(handle.clone()).unwrap();
        (handle, rx)
    }

    fn typing(user: &str) -> ServerEvent {
        ServerEvent::Typing {
            chat_id: "c1".into(),
            user_id: user.into(),
            expires_in_ms: 3000,
        }
    }

    #[test]
    fn test_every_connection_gets_the_same_frame() {
        let hub = hub();
        let (_a, mut alice) = connect(&hub, "alice", 4);
        let (_b, mut bob) = connect(&hub, "bob", 4);

        let report = hub.deliver("c1", &ServerEvent::Pong, None);

        assert_eq!(report.delivered, 2);
        assert_eq!(alice.try_recv().unwrap(), bob.try_recv().unwrap());
    }

    #[test]
    fn test_publish_except_skips_user() {
        let hub = hub();
        let (_a, mut alice) = connect(&hub, "alice", 4);
        let (_b, mut bob) = connect(&hub, "bob", 4);

        hub.publish_except("c1", &typing("alice"), "alice");

        assert!(alice.try_recv().is_err());
        assert!(bob.try_recv().unwrap().contains("\"typing\""));
    }

    #[test]
    fn test_full_queue_evicts_only_the_slow_consumer() {
        let hub = hub();
        let (slow, _slow_rx) = connect(&hub, "alice", 1);
        let (_fast, mut fast_rx) = connect(&hub, "bob", 8);

        hub.deliver("c1", &ServerEvent::Pong, None);
        let report = hub.deliver("c1", &ServerEvent::Pong, None);

        assert_eq!(report.evicted, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(slow.close_reason(), Some(CloseReason::SlowConsumer));
        assert_eq!(hub.registry().connection_count(), 1);
        assert!(fast_rx.try_recv().is_ok());
        assert!(fast_rx.try_recv().is_ok());
    }

    #[test]
    fn test_membership_changes_update_routing() {
        let hub = hub();
        let (_c, mut carol) = connect(&hub, "carol", 4);

        hub.publish("c1", &ServerEvent::Pong);
        assert!(carol.try_recv().is_err());

        hub.membership_changed(MembershipChange::Joined {
            chat_id: "c1".into(),
            user_id: "carol".into(),
        });
        hub.publish("c1", &ServerEvent::Pong);
        assert!(carol.try_recv().is_ok());

        hub.membership_changed(MembershipChange::Left {
            chat_id: "c1".into(),
            user_id: "carol".into(),
        });
        hub.publish("c1", &ServerEvent::Pong);
        assert!(carol.try_recv().is_err());
    }
}
