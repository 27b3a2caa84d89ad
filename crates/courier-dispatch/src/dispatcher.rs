//! Channel dispatcher: fans a notification out into per-channel scheduler
//! jobs and executes them when they come due.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_core::config::DispatchConfig;
use courier_core::error::Result;
use courier_core::events::{DispatchEvent, EventBus};
use courier_core::types::{
    ChannelCondition, ChannelJob, ChannelKind, ChannelSendInfo, ConfirmMode, DeliveryResult,
    FormattedContent, NotificationStatus, SendStatus, UserNotification,
};
use courier_scheduler::{HandlerOutcome, JobHandler, Scheduler, SchedulerBatch};
use serde::{Deserialize, Serialize};

use crate::condition::{evaluate, Decision};
use crate::registry::ChannelRegistry;
use crate::tracker::{NotificationTracker, OutcomeWrite};

/// How one channel of a notification should go out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelPlan {
    pub channel: ChannelKind,
    /// Falls back to the configured default for the channel.
    #[serde(default)]
    pub condition: Option<ChannelCondition>,
    #[serde(default)]
    pub target: Option<String>,
    /// Milliseconds to wait before the first attempt.
    #[serde(default)]
    pub delay_ms: u64,
}

impl ChannelPlan {
    pub fn new(channel: ChannelKind) -> Self {
        Self {
            channel,
            condition: None,
            target: None,
            delay_ms: 0,
        }
    }

    pub fn when(mut self, condition: ChannelCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn to(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// A notification for one user, with its channel plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub notification_id: String,
    pub user_id: String,
    pub app_id: String,
    #[serde(default)]
    pub confirm_mode: ConfirmMode,
    pub content: FormattedContent,
    pub channels: Vec<ChannelPlan>,
}

/// Glue between the scheduler, the tracker and the channel senders.
#[derive(Clone)]
pub struct ChannelDispatcher {
    scheduler: Scheduler,
    tracker: Arc<dyn NotificationTracker>,
    registry: Arc<ChannelRegistry>,
    events: EventBus,
    config: DispatchConfig,
}

impl ChannelDispatcher {
    pub fn new(
        scheduler: Scheduler,
        tracker: Arc<dyn NotificationTracker>,
        registry: Arc<ChannelRegistry>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            scheduler,
            tracker,
            registry,
            events: EventBus::default(),
            config,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn tracker(&self) -> &Arc<dyn NotificationTracker> {
        &self.tracker
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Register the tracking view and schedule one job per registered channel.
    /// Returns the scheduler keys that were (re)scheduled.
    pub async fn dispatch(&self, request: &DispatchRequest) -> Result<Vec<String>> {
        let id = &request.notification_id;
        let mut view = UserNotification::new(
            id,
            &request.user_id,
            &request.app_id,
            request.confirm_mode,
        );
        view.created_at = self.scheduler.now();
        if !self.tracker.register(&view).await? {
            tracing::debug!("Notification {} already tracked, rescheduling channels", id);
        }

        let mut keys = Vec::with_capacity(request.channels.len());
        for plan in &request.channels {
            if !self.registry.contains(plan.channel) {
                tracing::warn!(
                    "⚠️ No sender for channel '{}', not scheduling {}",
                    plan.channel,
                    id
                );
                continue;
            }

            let job = ChannelJob {
                notification_id: id.clone(),
                channel: plan.channel,
                user_id: request.user_id.clone(),
                app_id: request.app_id.clone(),
                attempt: 0,
                condition: plan
                    .condition
                    .unwrap_or_else(|| self.config.condition_for(plan.channel)),
                target: plan.target.clone(),
                content: request.content.clone(),
            };

            let info = ChannelSendInfo::new(SendStatus::Scheduled).at(self.scheduler.now());
            if let OutcomeWrite::Rejected { current } = self.record(id, plan.channel, info).await? {
                tracing::debug!("{}:{} is already {}, not rescheduling", id, plan.channel, current);
                continue;
            }

            let key = job.key();
            self.scheduler.schedule(&key, &job, plan.delay()).await?;
            keys.push(key);
        }

        tracing::info!(
            "📨 Dispatched {} to {} channel(s) for user {}",
            id,
            keys.len(),
            request.user_id
        );
        Ok(keys)
    }

    /// Drop pending jobs for the given channels and mark them skipped.
    pub async fn cancel(&self, notification_id: &str, channels: &[ChannelKind]) -> Result<usize> {
        let mut removed = 0;
        for &channel in channels {
            let count = self
                .scheduler
                .cancel(&ChannelJob::schedule_key(notification_id, channel))
                .await?;
            if count > 0 {
                removed += count;
                let info = ChannelSendInfo::new(SendStatus::Skipped)
                    .with_detail("cancelled")
                    .at(self.scheduler.now());
                self.record(notification_id, channel, info).await?;
            }
        }
        Ok(removed)
    }

    pub async fn mark_seen(&self, notification_id: &str) -> Result<bool> {
        self.tracker.mark_seen(notification_id).await
    }

    pub async fn mark_confirmed(&self, notification_id: &str) -> Result<bool> {
        self.tracker.mark_confirmed(notification_id).await
    }

    pub async fn status(&self, notification_id: &str) -> Result<Option<NotificationStatus>> {
        Ok(self
            .tracker
            .get(notification_id)
            .await?
            .map(|n| n.overall_status()))
    }

    /// Write an outcome and announce it when it took effect.
    async fn record(
        &self,
        notification_id: &str,
        channel: ChannelKind,
        info: ChannelSendInfo,
    ) -> Result<OutcomeWrite> {
        let status = info.status;
        let write = self
            .tracker
            .record_channel_outcome(notification_id, channel, info)
            .await?;
        if write == OutcomeWrite::Applied {
            self.events.publish(DispatchEvent::ChannelOutcomeChanged {
                notification_id: notification_id.to_string(),
                channel,
                status,
            });
        }
        Ok(write)
    }

    /// Evaluate and (maybe) send one due job.
    async fn deliver(&self, mut job: ChannelJob, attempt: u32) -> Result<HandlerOutcome> {
        let id = job.notification_id.clone();
        let channel = job.channel;

        let Some(tracking) = self.tracker.get(&id).await? else {
            tracing::warn!("⚠️ Job for unknown notification {} dropped", id);
            return Ok(HandlerOutcome::Permanent(format!("unknown notification {id}")));
        };

        if let Some(status) = tracking.channel_status(channel).filter(|s| s.is_terminal()) {
            tracing::debug!("{}:{} already {}, nothing to do", id, channel, status);
            return Ok(HandlerOutcome::Success);
        }

        if evaluate(job.condition, &tracking) == Decision::Skip {
            let reason = match job.condition {
                ChannelCondition::IfNotSeen => "seen before send",
                ChannelCondition::IfNotConfirmed => "confirmed before send",
                ChannelCondition::Always => "condition not met",
            };
            tracing::info!("⏭️ {}:{} skipped ({})", id, channel, reason);
            let info = ChannelSendInfo::new(SendStatus::Skipped)
                .with_detail(reason)
                .at(self.scheduler.now());
            self.record(&id, channel, info).await?;
            return Ok(HandlerOutcome::Success);
        }

        job.attempt = attempt;
        let info = ChannelSendInfo::new(SendStatus::Attempt)
            .with_attempt(attempt)
            .at(self.scheduler.now());
        if let OutcomeWrite::Rejected { current } = self.record(&id, channel, info).await? {
            // Another worker finished the channel after our read.
            tracing::debug!("{}:{} became {} before sending, nothing to do", id, channel, current);
            return Ok(HandlerOutcome::Success);
        }

        let Some(sender) = self.registry.get(channel) else {
            let reason = format!("no sender registered for '{channel}'");
            self.fail(&id, channel, attempt, &reason).await?;
            return Ok(HandlerOutcome::Permanent(reason));
        };

        let result = match tokio::time::timeout(
            self.config.send_timeout(),
            sender.send(&job, &job.content),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => DeliveryResult::transient(format!(
                "send timed out after {}s",
                self.config.send_timeout_secs
            )),
        };

        match result {
            DeliveryResult::Handled { delivered } => {
                let status = if delivered { SendStatus::Delivered } else { SendStatus::Sent };
                tracing::info!("✅ {}:{} {} (attempt {})", id, channel, status, attempt);
                let info = ChannelSendInfo::new(status)
                    .with_attempt(attempt)
                    .at(self.scheduler.now());
                self.record(&id, channel, info).await?;
                Ok(HandlerOutcome::Success)
            }
            DeliveryResult::Failed {
                transient: true,
                reason,
                ..
            } => {
                if attempt >= self.config.max_attempts {
                    let detail = format!("gave up after {attempt} attempt(s): {reason}");
                    self.fail(&id, channel, attempt, &detail).await?;
                    return Ok(HandlerOutcome::Permanent(detail));
                }
                tracing::warn!(
                    "⚠️ {}:{} attempt {}/{} failed: {}",
                    id,
                    channel,
                    attempt,
                    self.config.max_attempts,
                    reason
                );
                let info = ChannelSendInfo::new(SendStatus::Retrying)
                    .with_detail(reason.clone())
                    .with_attempt(attempt)
                    .at(self.scheduler.now());
                self.record(&id, channel, info).await?;
                Ok(HandlerOutcome::Retry(reason))
            }
            DeliveryResult::Failed {
                transient: false,
                reason,
                invalid_target,
            } => {
                self.fail(&id, channel, attempt, &reason).await?;
                if let Some(target_id) = invalid_target {
                    tracing::info!("🧹 Invalid {} target reported for user {}", channel, job.user_id);
                    self.events.publish(DispatchEvent::InvalidTargetDetected {
                        user_id: job.user_id.clone(),
                        channel,
                        target_id,
                    });
                }
                Ok(HandlerOutcome::Permanent(reason))
            }
        }
    }

    async fn fail(
        &self,
        notification_id: &str,
        channel: ChannelKind,
        attempt: u32,
        reason: &str,
    ) -> Result<()> {
        tracing::warn!("❌ {}:{} failed: {}", notification_id, channel, reason);
        let info = ChannelSendInfo::new(SendStatus::Failed)
            .with_detail(reason)
            .with_attempt(attempt)
            .at(self.scheduler.now());
        self.record(notification_id, channel, info).await?;
        Ok(())
    }
}

#[async_trait]
impl JobHandler for ChannelDispatcher {
    async fn handle(&self, batch: &SchedulerBatch) -> HandlerOutcome {
        let job: ChannelJob = match batch.decode_latest() {
            Ok(Some(job)) => job,
            Ok(None) => return HandlerOutcome::Permanent("empty batch".into()),
            Err(e) => return HandlerOutcome::Permanent(format!("undecodable job: {e}")),
        };
        let attempt = batch.retry_count + 1;
        let (id, channel) = (job.notification_id.clone(), job.channel);

        match self.deliver(job, attempt).await {
            Ok(outcome) => outcome,
            Err(e) if attempt >= self.config.max_attempts => {
                let reason = format!("gave up after {attempt} attempt(s): {e}");
                if let Err(e) = self.fail(&id, channel, attempt, &reason).await {
                    tracing::warn!("⚠️ Could not record failure of {}:{}: {e}", id, channel);
                }
                HandlerOutcome::Permanent(reason)
            }
            Err(e) => HandlerOutcome::Retry(e.to_string()),
        }
    }

    async fn on_exhausted(&self, batch: &SchedulerBatch, reason: &str) {
        let Ok(Some(job)) = batch.decode_latest::<ChannelJob>() else {
            return;
        };
        if let Err(e) = self
            .fail(&job.notification_id, job.channel, batch.retry_count + 1, reason)
            .await
        {
            tracing::warn!("⚠️ Could not record failure of {}: {e}", batch.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::InMemoryTracker;
    use chrono::{DateTime, Utc};
    use courier_core::config::SchedulerConfig;
    use courier_core::traits::ChannelSender;
    use courier_scheduler::{InMemoryStore, SchedulerStore};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone)]
    struct TestClock(Arc<Mutex<DateTime<Utc>>>);

    impl TestClock {
        fn new() -> Self {
            Self(Arc::new(Mutex::new(Utc::now())))
        }
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
        fn advance(&self, secs: i64) {
            *self.0.lock().unwrap() += chrono::Duration::seconds(secs);
        }
    }

    /// Replays scripted results, then answers `handled`.
    struct FakeSender {
        kind: ChannelKind,
        script: Mutex<VecDeque<DeliveryResult>>,
        fallback: DeliveryResult,
        calls: AtomicUsize,
    }

    impl FakeSender {
        fn ok(kind: ChannelKind) -> Arc<Self> {
            Self::always(kind, DeliveryResult::handled())
        }

        fn always(kind: ChannelKind, result: DeliveryResult) -> Arc<Self> {
            Arc::new(Self {
                kind,
                script: Mutex::new(VecDeque::new()),
                fallback: result,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChannelSender for FakeSender {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn send(&self, _job: &ChannelJob, _content: &FormattedContent) -> DeliveryResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self.script.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| self.fallback.clone())
        }
    }

    struct Harness {
        clock: TestClock,
        store: Arc<InMemoryStore>,
        dispatcher: Arc<ChannelDispatcher>,
    }

    /// Reads never show channel outcomes, as if another worker wrote them
    /// after this one looked.
    struct StaleReads(InMemoryTracker);

    #[async_trait]
    impl NotificationTracker for StaleReads {
        async fn register(&self, notification: &UserNotification) -> Result<bool> {
            self.0.register(notification).await
        }

        async fn get(&self, id: &str) -> Result<Option<UserNotification>> {
            Ok(self.0.get(id).await?.map(|mut n| {
                n.channels.clear();
                n
            }))
        }

        async fn mark_seen(&self, id: &str) -> Result<bool> {
            self.0.mark_seen(id).await
        }

        async fn mark_confirmed(&self, id: &str) -> Result<bool> {
            self.0.mark_confirmed(id).await
        }

        async fn record_channel_outcome(
            &self,
            id: &str,
            channel: ChannelKind,
            info: ChannelSendInfo,
        ) -> Result<OutcomeWrite> {
            self.0.record_channel_outcome(id, channel, info).await
        }
    }

    impl Harness {
        fn new(senders: Vec<Arc<FakeSender>>, max_attempts: u32) -> Self {
            Self::with_tracker(senders, max_attempts, Arc::new(InMemoryTracker::new()))
        }

        fn with_tracker(
            senders: Vec<Arc<FakeSender>>,
            max_attempts: u32,
            tracker: Arc<dyn NotificationTracker>,
        ) -> Self {
            let clock = TestClock::new();
            let store = Arc::new(InMemoryStore::new(10));
            let config = SchedulerConfig {
                backoff_base_ms: 1000,
                backoff_cap_secs: 8,
                ..SchedulerConfig::default()
            };
            let scheduler = {
                let clock = clock.clone();
                Scheduler::new(store.clone(), config)
                    .with_worker_id("test")
                    .with_clock(move || clock.now())
            };
            let mut registry = ChannelRegistry::new();
            for sender in senders {
                registry.register(sender);
            }
            let dispatcher = ChannelDispatcher::new(
                scheduler,
                tracker,
                Arc::new(registry),
                DispatchConfig {
                    max_attempts,
                    ..DispatchConfig::default()
                },
            );
            Self {
                clock,
                store,
                dispatcher: Arc::new(dispatcher),
            }
        }

        async fn tick(&self) -> usize {
            self.dispatcher
                .scheduler()
                .run_once(self.dispatcher.clone())
                .await
                .unwrap()
        }

        async fn channel_status(&self, id: &str, channel: ChannelKind) -> Option<SendStatus> {
            let n = self.dispatcher.tracker().get(id).await.unwrap().unwrap();
            n.channel_status(channel)
        }
    }

    fn request(id: &str, channels: Vec<ChannelPlan>) -> DispatchRequest {
        DispatchRequest {
            notification_id: id.into(),
            user_id: "u1".into(),
            app_id: "app".into(),
            confirm_mode: ConfirmMode::Explicit,
            content: FormattedContent::text("Invoice ready", "Your invoice is ready."),
            channels,
        }
    }

    #[tokio::test]
    async fn test_seen_suppresses_delayed_email() {
        let push = FakeSender::ok(ChannelKind::WebPush);
        let email = FakeSender::ok(ChannelKind::Email);
        let h = Harness::new(vec![push.clone(), email.clone()], 5);

        let keys = h
            .dispatcher
            .dispatch(&request(
                "n1",
                vec![
                    ChannelPlan::new(ChannelKind::WebPush)
                        .when(ChannelCondition::Always)
                        .to("sub-1"),
                    ChannelPlan::new(ChannelKind::Email)
                        .when(ChannelCondition::IfNotSeen)
                        .to("user@example.com")
                        .after(Duration::from_secs(30)),
                ],
            ))
            .await
            .unwrap();
        assert_eq!(keys, vec!["n1:web_push".to_string(), "n1:email".to_string()]);

        assert_eq!(h.tick().await, 1);
        assert_eq!(h.channel_status("n1", ChannelKind::WebPush).await, Some(SendStatus::Sent));
        assert_eq!(h.channel_status("n1", ChannelKind::Email).await, Some(SendStatus::Scheduled));

        h.clock.advance(10);
        assert!(h.dispatcher.mark_seen("n1").await.unwrap());

        h.clock.advance(20);
        assert_eq!(h.tick().await, 1);
        assert_eq!(h.channel_status("n1", ChannelKind::Email).await, Some(SendStatus::Skipped));
        assert_eq!(email.calls(), 0);
        assert_eq!(push.calls(), 1);
        assert_eq!(
            h.dispatcher.status("n1").await.unwrap(),
            Some(NotificationStatus::Seen)
        );
        assert_eq!(h.store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transient_failures_stop_at_max_attempts() {
        let sms = FakeSender::always(ChannelKind::Sms, DeliveryResult::transient("503"));
        let h = Harness::new(vec![sms.clone()], 3);
        h.dispatcher
            .dispatch(&request("n1", vec![ChannelPlan::new(ChannelKind::Sms).to("+100")]))
            .await
            .unwrap();

        assert_eq!(h.tick().await, 1);
        assert_eq!(h.channel_status("n1", ChannelKind::Sms).await, Some(SendStatus::Retrying));

        for _ in 0..5 {
            h.clock.advance(60);
            h.tick().await;
        }

        assert_eq!(sms.calls(), 3);
        let n = h.dispatcher.tracker().get("n1").await.unwrap().unwrap();
        let info = &n.channels[&ChannelKind::Sms];
        assert_eq!(info.status, SendStatus::Failed);
        assert_eq!(info.attempt, 3);
        assert_eq!(h.store.pending_count().await.unwrap(), 0);
        assert_eq!(n.overall_status(), NotificationStatus::Failed);
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let push = FakeSender::ok(ChannelKind::MobilePush);
        push.script
            .lock()
            .unwrap()
            .push_back(DeliveryResult::transient("timeout"));
        let h = Harness::new(vec![push.clone()], 5);
        h.dispatcher
            .dispatch(&request("n1", vec![ChannelPlan::new(ChannelKind::MobilePush)]))
            .await
            .unwrap();

        h.tick().await;
        // Backoff for the first retry is one second.
        assert_eq!(h.tick().await, 0);
        h.clock.advance(1);
        assert_eq!(h.tick().await, 1);

        let n = h.dispatcher.tracker().get("n1").await.unwrap().unwrap();
        assert_eq!(n.channels[&ChannelKind::MobilePush].status, SendStatus::Sent);
        assert_eq!(n.channels[&ChannelKind::MobilePush].attempt, 2);
    }

    #[tokio::test]
    async fn test_terminal_channel_is_not_sent_twice() {
        let web = FakeSender::always(ChannelKind::Web, DeliveryResult::Handled { delivered: true });
        let h = Harness::new(vec![web.clone()], 5);
        h.dispatcher
            .dispatch(&request("n1", vec![ChannelPlan::new(ChannelKind::Web)]))
            .await
            .unwrap();
        h.tick().await;
        assert_eq!(h.channel_status("n1", ChannelKind::Web).await, Some(SendStatus::Delivered));

        // A duplicate job for the same pair, e.g. from a redelivered lease.
        let job = ChannelJob {
            notification_id: "n1".into(),
            channel: ChannelKind::Web,
            user_id: "u1".into(),
            app_id: "app".into(),
            attempt: 0,
            condition: ChannelCondition::Always,
            target: None,
            content: FormattedContent::default(),
        };
        h.dispatcher
            .scheduler()
            .schedule(&job.key(), &job, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(h.tick().await, 1);
        assert_eq!(web.calls(), 1);
        assert_eq!(h.store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_channel_finished_elsewhere_is_not_resent() {
        let web = FakeSender::ok(ChannelKind::Web);
        let h = Harness::with_tracker(
            vec![web.clone()],
            5,
            Arc::new(StaleReads(InMemoryTracker::new())),
        );
        h.dispatcher
            .dispatch(&request("n1", vec![ChannelPlan::new(ChannelKind::Web)]))
            .await
            .unwrap();

        // Another worker sent it between our read and our Attempt write.
        let sent = ChannelSendInfo::new(SendStatus::Sent).with_attempt(1);
        h.dispatcher
            .tracker()
            .record_channel_outcome("n1", ChannelKind::Web, sent)
            .await
            .unwrap();

        assert_eq!(h.tick().await, 1);
        assert_eq!(web.calls(), 0);
        assert_eq!(h.store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sub_second_delay_is_kept() {
        let email = FakeSender::ok(ChannelKind::Email);
        let h = Harness::new(vec![email.clone()], 5);
        let plan = ChannelPlan::new(ChannelKind::Email).after(Duration::from_millis(1500));
        assert_eq!(plan.delay_ms, 1500);
        assert_eq!(plan.delay(), Duration::from_millis(1500));

        h.dispatcher
            .dispatch(&request("n1", vec![plan]))
            .await
            .unwrap();
        h.clock.advance(1);
        assert_eq!(h.tick().await, 0);
        h.clock.advance(1);
        assert_eq!(h.tick().await, 1);
        assert_eq!(email.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_target_is_published() {
        let push = FakeSender::always(
            ChannelKind::WebPush,
            DeliveryResult::invalid_target("sub-stale", "410 Gone"),
        );
        let h = Harness::new(vec![push], 5);
        let mut events = h.dispatcher.events().subscribe();

        h.dispatcher
            .dispatch(&request(
                "n1",
                vec![ChannelPlan::new(ChannelKind::WebPush).to("sub-stale")],
            ))
            .await
            .unwrap();
        h.tick().await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&DispatchEvent::InvalidTargetDetected {
            user_id: "u1".into(),
            channel: ChannelKind::WebPush,
            target_id: "sub-stale".into(),
        }));
        assert!(seen.contains(&DispatchEvent::ChannelOutcomeChanged {
            notification_id: "n1".into(),
            channel: ChannelKind::WebPush,
            status: SendStatus::Failed,
        }));
        assert_eq!(h.channel_status("n1", ChannelKind::WebPush).await, Some(SendStatus::Failed));
    }

    #[tokio::test]
    async fn test_unregistered_channel_is_not_scheduled() {
        let h = Harness::new(vec![FakeSender::ok(ChannelKind::Email)], 5);
        let keys = h
            .dispatcher
            .dispatch(&request(
                "n1",
                vec![
                    ChannelPlan::new(ChannelKind::Email),
                    ChannelPlan::new(ChannelKind::Sms),
                ],
            ))
            .await
            .unwrap();
        assert_eq!(keys, vec!["n1:email".to_string()]);
        assert!(h.store.items_for("n1:sms").await.is_empty());
        assert_eq!(h.channel_status("n1", ChannelKind::Sms).await, None);
    }

    #[tokio::test]
    async fn test_cancel_marks_pending_channels_skipped() {
        let email = FakeSender::ok(ChannelKind::Email);
        let h = Harness::new(vec![email.clone()], 5);
        h.dispatcher
            .dispatch(&request(
                "n1",
                vec![ChannelPlan::new(ChannelKind::Email).after(Duration::from_secs(60))],
            ))
            .await
            .unwrap();

        let removed = h
            .dispatcher
            .cancel("n1", &[ChannelKind::Email, ChannelKind::Sms])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(h.channel_status("n1", ChannelKind::Email).await, Some(SendStatus::Skipped));

        h.clock.advance(120);
        assert_eq!(h.tick().await, 0);
        assert_eq!(email.calls(), 0);
    }
}
