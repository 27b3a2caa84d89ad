//! Events published for collaborators outside the dispatch core.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{ChannelKind, SendStatus};

/// Something other subsystems may want to react to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEvent {
    ChannelOutcomeChanged {
        notification_id: String,
        channel: ChannelKind,
        status: SendStatus,
    },
    /// Consumed by profile management to prune stale tokens / subscriptions.
    InvalidTargetDetected {
        user_id: String,
        channel: ChannelKind,
        target_id: String,
    },
}

/// In-process fan-out of dispatch events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DispatchEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Nobody listening is fine.
    pub fn publish(&self, event: DispatchEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event dropped: no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(DispatchEvent::InvalidTargetDetected {
            user_id: "u1".into(),
            channel: ChannelKind::MobilePush,
            target_id: "tok-1".into(),
        });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, DispatchEvent::InvalidTargetDetected { .. }));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish(DispatchEvent::ChannelOutcomeChanged {
            notification_id: "n1".into(),
            channel: ChannelKind::Email,
            status: SendStatus::Sent,
        });
    }
}
