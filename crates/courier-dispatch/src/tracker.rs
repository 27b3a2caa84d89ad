//! Notification tracking: seen/confirmed flags and per-channel outcomes.
//!
//! The tracker is the only writer of `is_seen` / `is_confirmed`; both flags
//! only ever go from false to true. Channel outcomes move forward only, so a
//! stale `Attempt` arriving after `Sent` is dropped instead of applied.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use courier_core::error::{CourierError, Result};
use courier_core::types::{ChannelKind, ChannelSendInfo, SendStatus, UserNotification};
use tokio::sync::RwLock;

/// Result of `record_channel_outcome`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeWrite {
    Applied,
    /// Not a forward transition from `current`; nothing written.
    Rejected { current: SendStatus },
}

#[async_trait]
pub trait NotificationTracker: Send + Sync {
    /// Create the tracking view unless it already exists. Returns `true` when created.
    async fn register(&self, notification: &UserNotification) -> Result<bool>;

    async fn get(&self, id: &str) -> Result<Option<UserNotification>>;

    /// Returns `true` the first time only.
    async fn mark_seen(&self, id: &str) -> Result<bool>;

    /// Accepted in any confirm mode. Returns `true` the first time only.
    async fn mark_confirmed(&self, id: &str) -> Result<bool>;

    async fn record_channel_outcome(
        &self,
        id: &str,
        channel: ChannelKind,
        info: ChannelSendInfo,
    ) -> Result<OutcomeWrite>;
}

/// Forward-transition rule shared by every tracker implementation.
pub(crate) fn check_transition(
    id: &str,
    channel: ChannelKind,
    current: Option<SendStatus>,
    next: SendStatus,
) -> OutcomeWrite {
    match current {
        Some(current) if !current.can_transition_to(next) => {
            tracing::debug!(
                "🚫 Stale outcome for {}:{} ignored ({} → {})",
                id,
                channel,
                current,
                next
            );
            OutcomeWrite::Rejected { current }
        }
        _ => OutcomeWrite::Applied,
    }
}

/// Tracker held in memory.
#[derive(Default)]
pub struct InMemoryTracker {
    notifications: RwLock<HashMap<String, UserNotification>>,
}

impl InMemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationTracker for InMemoryTracker {
    async fn register(&self, notification: &UserNotification) -> Result<bool> {
        let mut map = self.notifications.write().await;
        if map.contains_key(&notification.id) {
            return Ok(false);
        }
        map.insert(notification.id.clone(), notification.clone());
        Ok(true)
    }

    async fn get(&self, id: &str) -> Result<Option<UserNotification>> {
        Ok(self.notifications.read().await.get(id).cloned())
    }

    async fn mark_seen(&self, id: &str) -> Result<bool> {
        let mut map = self.notifications.write().await;
        let n = map
            .get_mut(id)
            .ok_or_else(|| CourierError::NotFound(format!("notification {id}")))?;
        if n.is_seen {
            return Ok(false);
        }
        n.is_seen = true;
        n.seen_at = Some(Utc::now());
        tracing::debug!("👀 Notification {} seen", id);
        Ok(true)
    }

    async fn mark_confirmed(&self, id: &str) -> Result<bool> {
        let mut map = self.notifications.write().await;
        let n = map
            .get_mut(id)
            .ok_or_else(|| CourierError::NotFound(format!("notification {id}")))?;
        if n.is_confirmed {
            return Ok(false);
        }
        n.is_confirmed = true;
        n.confirmed_at = Some(Utc::now());
        tracing::debug!("☑️ Notification {} confirmed", id);
        Ok(true)
    }

    async fn record_channel_outcome(
        &self,
        id: &str,
        channel: ChannelKind,
        info: ChannelSendInfo,
    ) -> Result<OutcomeWrite> {
        let mut map = self.notifications.write().await;
        let n = map
            .get_mut(id)
            .ok_or_else(|| CourierError::NotFound(format!("notification {id}")))?;
        let write = check_transition(id, channel, n.channel_status(channel), info.status);
        if write == OutcomeWrite::Applied {
            n.channels.insert(channel, info);
        }
        Ok(write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::types::ConfirmMode;

    async fn tracker_with(id: &str) -> InMemoryTracker {
        let tracker = InMemoryTracker::new();
        tracker
            .register(&UserNotification::new(id, "u1", "app", ConfirmMode::Explicit))
            .await
            .unwrap();
        tracker
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let tracker = tracker_with("n1").await;
        tracker.mark_seen("n1").await.unwrap();

        let fresh = UserNotification::new("n1", "u1", "app", ConfirmMode::None);
        assert!(!tracker.register(&fresh).await.unwrap());
        assert!(tracker.get("n1").await.unwrap().unwrap().is_seen);
    }

    #[tokio::test]
    async fn test_confirm_twice_keeps_first_timestamp() {
        let tracker = tracker_with("n1").await;
        assert!(tracker.mark_confirmed("n1").await.unwrap());
        let first = tracker.get("n1").await.unwrap().unwrap().confirmed_at;

        assert!(!tracker.mark_confirmed("n1").await.unwrap());
        let n = tracker.get("n1").await.unwrap().unwrap();
        assert!(n.is_confirmed);
        assert!(!n.is_seen);
        assert_eq!(n.confirmed_at, first);
    }

    #[tokio::test]
    async fn test_confirm_without_explicit_mode_is_accepted() {
        let tracker = InMemoryTracker::new();
        tracker
            .register(&UserNotification::new("n2", "u1", "app", ConfirmMode::None))
            .await
            .unwrap();
        assert!(tracker.mark_confirmed("n2").await.unwrap());
    }

    #[tokio::test]
    async fn test_sent_after_failed_is_rejected() {
        let tracker = tracker_with("n1").await;
        let ch = ChannelKind::Sms;
        tracker
            .record_channel_outcome("n1", ch, ChannelSendInfo::new(SendStatus::Failed))
            .await
            .unwrap();

        let write = tracker
            .record_channel_outcome("n1", ch, ChannelSendInfo::new(SendStatus::Sent))
            .await
            .unwrap();
        assert_eq!(write, OutcomeWrite::Rejected { current: SendStatus::Failed });
        let n = tracker.get("n1").await.unwrap().unwrap();
        assert_eq!(n.channel_status(ch), Some(SendStatus::Failed));
    }

    #[tokio::test]
    async fn test_forward_transitions_apply() {
        let tracker = tracker_with("n1").await;
        let ch = ChannelKind::Email;
        for status in [
            SendStatus::Scheduled,
            SendStatus::Attempt,
            SendStatus::Retrying,
            SendStatus::Attempt,
            SendStatus::Sent,
            SendStatus::Delivered,
        ] {
            let write = tracker
                .record_channel_outcome("n1", ch, ChannelSendInfo::new(status))
                .await
                .unwrap();
            assert_eq!(write, OutcomeWrite::Applied, "{status}");
        }
        let stale = tracker
            .record_channel_outcome("n1", ch, ChannelSendInfo::new(SendStatus::Attempt))
            .await
            .unwrap();
        assert!(matches!(stale, OutcomeWrite::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_unknown_notification() {
        let tracker = InMemoryTracker::new();
        assert!(matches!(
            tracker.mark_seen("missing").await,
            Err(CourierError::NotFound(_))
        ));
        assert!(tracker.get("missing").await.unwrap().is_none());
    }
}
