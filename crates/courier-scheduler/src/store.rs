//! Scheduler store contract.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::error::Result;

use crate::item::{ScheduledItem, SchedulerBatch};

/// How `enqueue` treats an existing pending item for the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnqueueMode {
    /// Collapse into the unclaimed pending item: payload replaced, earliest due time kept.
    #[default]
    Replace,
    /// Always add a new item; the handler sees every submission in the batch.
    Append,
}

/// What `fail` did with the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    Rescheduled,
    /// Retry budget exhausted, items moved to the dead state.
    Dead,
    /// The caller no longer held the lease; nothing changed.
    LeaseLost,
}

/// Persistence for due work items.
///
/// Every claim is exclusive per key: while a key holds a live lease none of
/// its items can be claimed by anyone else, in this process or another.
#[async_trait]
pub trait SchedulerStore: Send + Sync {
    /// Upsert work for `key`. Repeating the call is harmless.
    async fn enqueue(
        &self,
        key: &str,
        payload: Vec<u8>,
        due_time: DateTime<Utc>,
        mode: EnqueueMode,
    ) -> Result<()>;

    /// Lease up to `limit` due keys to `owner` and return their items.
    async fn claim_due(
        &self,
        limit: usize,
        lease_duration: Duration,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<SchedulerBatch>>;

    /// Remove the items `owner` leased for `key`. `false` if the lease was lost.
    async fn complete(&self, key: &str, owner: &str) -> Result<bool>;

    /// Release the lease and requeue, or dead-letter past the retry budget.
    async fn fail(
        &self,
        key: &str,
        owner: &str,
        next_due: DateTime<Utc>,
        retry_count: u32,
        error: &str,
    ) -> Result<FailOutcome>;

    /// Make leases that expired before `now` claimable again. Returns how many items were freed.
    async fn release_expired_leases(&self, now: DateTime<Utc>) -> Result<usize>;

    /// Drop unleased pending items for `key`.
    async fn cancel(&self, key: &str) -> Result<usize>;

    async fn dead_items(&self, limit: usize) -> Result<Vec<ScheduledItem>>;

    async fn pending_count(&self) -> Result<usize>;
}

/// `at + offset`, saturating instead of overflowing.
pub(crate) fn offset_by(at: DateTime<Utc>, offset: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(offset)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
