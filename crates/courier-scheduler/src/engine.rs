//! Scheduler Engine: turns the store into `schedule()` for producers and a
//! polling execution loop for workers.
//! Uses tokio::interval for ticking; each claimed key runs on its own task
//! under a handler timeout, bounded by a semaphore.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::config::SchedulerConfig;
use courier_core::error::Result;
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::backoff::BackoffPolicy;
use crate::item::SchedulerBatch;
use crate::store::{offset_by, EnqueueMode, FailOutcome, SchedulerStore};

/// Source of "now". Swappable so tests can move time by hand.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Verdict of one batch execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Success,
    /// Try again later with backoff.
    Retry(String),
    /// Give up. The handler has already recorded the terminal outcome.
    Permanent(String),
}

/// Consumer of claimed batches.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, batch: &SchedulerBatch) -> HandlerOutcome;

    /// Called once the store dead-letters a key after its last retry.
    async fn on_exhausted(&self, batch: &SchedulerBatch, reason: &str) {
        let _ = (batch, reason);
    }
}

/// Cheap to clone. Every clone shares the store.
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn SchedulerStore>,
    config: SchedulerConfig,
    backoff: BackoffPolicy,
    worker_id: String,
    clock: Clock,
}

impl Scheduler {
    pub fn new(store: Arc<dyn SchedulerStore>, config: SchedulerConfig) -> Self {
        Self {
            store,
            backoff: BackoffPolicy::from_config(&config),
            config,
            worker_id: default_worker_id(),
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Lease owner name used for claims.
    pub fn with_worker_id(mut self, worker_id: &str) -> Self {
        self.worker_id = worker_id.to_string();
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn store(&self) -> &Arc<dyn SchedulerStore> {
        &self.store
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Schedule `payload` under `key` after `delay`, collapsing with pending work.
    /// Returns the due time that was requested.
    pub async fn schedule<T>(&self, key: &str, payload: &T, delay: Duration) -> Result<DateTime<Utc>>
    where
        T: Serialize + Sync + ?Sized,
    {
        self.schedule_with(key, payload, delay, EnqueueMode::Replace)
            .await
    }

    pub async fn schedule_with<T>(
        &self,
        key: &str,
        payload: &T,
        delay: Duration,
        mode: EnqueueMode,
    ) -> Result<DateTime<Utc>>
    where
        T: Serialize + Sync + ?Sized,
    {
        let bytes = serde_json::to_vec(payload)?;
        let due = offset_by(self.now(), delay);
        self.store.enqueue(key, bytes, due, mode).await?;
        tracing::debug!("📅 Scheduled '{}' due {}", key, due.to_rfc3339());
        Ok(due)
    }

    /// Drop pending, unclaimed work for `key`.
    pub async fn cancel(&self, key: &str) -> Result<usize> {
        let removed = self.store.cancel(key).await?;
        if removed > 0 {
            tracing::info!("🗑️ Cancelled {} pending item(s) for '{}'", removed, key);
        }
        Ok(removed)
    }

    /// One claim cycle: execute every due batch and wait for all of them.
    /// Returns how many batches ran.
    pub async fn run_once(&self, handler: Arc<dyn JobHandler>) -> Result<usize> {
        let batches = self.claim(self.config.claim_batch_size).await?;
        let count = batches.len();
        futures::future::join_all(
            batches
                .into_iter()
                .map(|batch| self.execute(handler.clone(), batch)),
        )
        .await;
        Ok(count)
    }

    /// Worker loop. Runs until `shutdown` flips to `true` (or its sender is
    /// dropped), then drains in-flight batches for up to `shutdown_timeout`.
    pub async fn run(
        &self,
        handler: Arc<dyn JobHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        tracing::info!(
            "⏰ Scheduler '{}' started (poll every {}ms, {} workers)",
            self.worker_id,
            self.config.poll_interval_ms,
            self.config.worker_concurrency
        );

        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let permits = Arc::new(Semaphore::new(self.config.worker_concurrency));
        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut outages: u32 = 0;

        while !*shutdown.borrow() {
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    tracing::warn!("⚠️ Batch task ended abnormally: {e}");
                }
            }

            let free = permits
                .available_permits()
                .min(self.config.claim_batch_size);
            if free == 0 {
                continue;
            }

            match self.claim(free).await {
                Ok(batches) => {
                    if outages > 0 {
                        tracing::info!("✅ Store reachable again after {} failed poll(s)", outages);
                        outages = 0;
                    }
                    for batch in batches {
                        let Ok(permit) = permits.clone().acquire_owned().await else {
                            break;
                        };
                        let this = self.clone();
                        let handler = handler.clone();
                        in_flight.spawn(async move {
                            let _permit = permit;
                            this.execute(handler, batch).await;
                        });
                    }
                }
                Err(e) => {
                    let pause = self.backoff.delay(outages);
                    outages = outages.saturating_add(1);
                    tracing::warn!(
                        "⚠️ Store unavailable ({e}); pausing polls for {}ms",
                        pause.as_millis()
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(pause) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        tracing::info!(
            "🛑 Scheduler '{}' stopping, draining {} in-flight batch(es)",
            self.worker_id,
            in_flight.len()
        );
        let drained = tokio::time::timeout(self.config.shutdown_timeout(), async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                "⚠️ Abandoning {} batch(es) after {}s; their leases will expire",
                in_flight.len(),
                self.config.shutdown_timeout_secs
            );
            in_flight.abort_all();
        }
        Ok(())
    }

    async fn claim(&self, limit: usize) -> Result<Vec<SchedulerBatch>> {
        let now = self.now();
        let released = self.store.release_expired_leases(now).await?;
        if released > 0 {
            tracing::info!("♻️ Released {} item(s) with expired leases", released);
        }
        self.store
            .claim_due(limit, self.config.lease_duration(), &self.worker_id, now)
            .await
    }

    /// Run the handler for one batch and write the verdict back to the store.
    async fn execute(&self, handler: Arc<dyn JobHandler>, batch: SchedulerBatch) {
        let outcome = {
            let handler = handler.clone();
            let job = batch.clone();
            let mut task = AbortOnDrop(tokio::spawn(async move { handler.handle(&job).await }));
            match tokio::time::timeout(self.config.handler_timeout(), &mut task.0).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => HandlerOutcome::Retry(format!("handler panicked: {e}")),
                Err(_) => {
                    task.0.abort();
                    HandlerOutcome::Retry(format!(
                        "handler timed out after {}s",
                        self.config.handler_timeout_secs
                    ))
                }
            }
        };

        if let Err(e) = self.settle(handler.as_ref(), &batch, outcome).await {
            tracing::warn!(
                "⚠️ Could not settle '{}': {e}; it will rerun after the lease expires",
                batch.key
            );
        }
    }

    async fn settle(
        &self,
        handler: &dyn JobHandler,
        batch: &SchedulerBatch,
        outcome: HandlerOutcome,
    ) -> Result<()> {
        match outcome {
            HandlerOutcome::Success => {
                if !self.store.complete(&batch.key, &self.worker_id).await? {
                    tracing::debug!("Lease on '{}' was lost before completion", batch.key);
                }
            }
            HandlerOutcome::Permanent(reason) => {
                tracing::warn!("❌ '{}' failed permanently: {}", batch.key, reason);
                self.store.complete(&batch.key, &self.worker_id).await?;
            }
            HandlerOutcome::Retry(reason) => {
                let next_due = offset_by(self.now(), self.backoff.delay(batch.retry_count));
                let retry_count = batch.retry_count + 1;
                match self
                    .store
                    .fail(&batch.key, &self.worker_id, next_due, retry_count, &reason)
                    .await?
                {
                    FailOutcome::Rescheduled => tracing::info!(
                        "🔁 '{}' retry #{} at {} ({})",
                        batch.key,
                        retry_count,
                        next_due.to_rfc3339(),
                        reason
                    ),
                    FailOutcome::Dead => {
                        tracing::warn!(
                            "💀 '{}' dead-lettered after {} retries: {}",
                            batch.key,
                            batch.retry_count,
                            reason
                        );
                        handler.on_exhausted(batch, &reason).await;
                    }
                    FailOutcome::LeaseLost => {
                        tracing::debug!("Lease on '{}' was lost before retry", batch.key)
                    }
                }
            }
        }
        Ok(())
    }
}

/// Aborts the handler task when the batch task is dropped, e.g. by
/// `abort_all` after the drain timeout.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// `<hostname>-<8 hex>`, unique per scheduler instance.
fn default_worker_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "worker".into());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{host}-{}", &suffix[..8])
}
