//! In-process scheduler store: tests and single-worker deployments.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::error::Result;
use tokio::sync::Mutex;

use crate::item::{ItemState, ScheduledItem, SchedulerBatch};
use crate::store::{offset_by, EnqueueMode, FailOutcome, SchedulerStore};

#[derive(Default)]
struct MemState {
    items: BTreeMap<i64, ScheduledItem>,
    next_id: i64,
}

/// Scheduler store held in memory. Claims are exclusive within the process.
pub struct InMemoryStore {
    state: Mutex<MemState>,
    max_retries: u32,
}

impl InMemoryStore {
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: Mutex::new(MemState::default()),
            max_retries,
        }
    }

    /// Snapshot of every item for `key`, for inspection.
    pub async fn items_for(&self, key: &str) -> Vec<ScheduledItem> {
        let state = self.state.lock().await;
        state
            .items
            .values()
            .filter(|i| i.key == key)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SchedulerStore for InMemoryStore {
    async fn enqueue(
        &self,
        key: &str,
        payload: Vec<u8>,
        due_time: DateTime<Utc>,
        mode: EnqueueMode,
    ) -> Result<()> {
        let mut state = self.state.lock().await;

        if mode == EnqueueMode::Replace
            && let Some(existing) = state
                .items
                .values_mut()
                .rev()
                .find(|i| i.key == key && i.state == ItemState::Pending && i.lease_owner.is_none())
        {
            existing.payload = payload;
            existing.due_time = existing.due_time.min(due_time);
            tracing::debug!("🔁 Collapsed pending item for '{}'", key);
            return Ok(());
        }

        state.next_id += 1;
        let id = state.next_id;
        state.items.insert(
            id,
            ScheduledItem {
                id,
                key: key.to_string(),
                payload,
                due_time,
                retry_count: 0,
                lease_owner: None,
                lease_expiry: None,
                state: ItemState::Pending,
                last_error: None,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn claim_due(
        &self,
        limit: usize,
        lease_duration: Duration,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<SchedulerBatch>> {
        let mut state = self.state.lock().await;

        // key → (earliest due, holds a live lease)
        let mut keys: BTreeMap<String, (DateTime<Utc>, bool)> = BTreeMap::new();
        for item in state.items.values().filter(|i| i.state == ItemState::Pending) {
            let entry = keys
                .entry(item.key.clone())
                .or_insert((item.due_time, false));
            entry.0 = entry.0.min(item.due_time);
            entry.1 |= item.is_leased_at(now);
        }

        let mut due: Vec<(String, DateTime<Utc>)> = keys
            .into_iter()
            .filter(|(_, (first_due, leased))| *first_due <= now && !leased)
            .map(|(key, (first_due, _))| (key, first_due))
            .collect();
        due.sort_by_key(|(_, first_due)| *first_due);
        due.truncate(limit);

        let expiry = offset_by(now, lease_duration);
        let mut batches = Vec::with_capacity(due.len());
        for (key, _) in due {
            let mut claimed = Vec::new();
            for item in state
                .items
                .values_mut()
                .filter(|i| i.key == key && i.state == ItemState::Pending)
            {
                item.lease_owner = Some(owner.to_string());
                item.lease_expiry = Some(expiry);
                claimed.push(item.clone());
            }
            batches.push(SchedulerBatch::new(key, claimed, expiry));
        }
        Ok(batches)
    }

    async fn complete(&self, key: &str, owner: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let before = state.items.len();
        state.items.retain(|_, i| {
            !(i.key == key && i.state == ItemState::Pending && i.lease_owner.as_deref() == Some(owner))
        });
        Ok(state.items.len() < before)
    }

    async fn fail(
        &self,
        key: &str,
        owner: &str,
        next_due: DateTime<Utc>,
        retry_count: u32,
        error: &str,
    ) -> Result<FailOutcome> {
        let mut state = self.state.lock().await;
        let dead = retry_count > self.max_retries;
        let mut touched = false;
        for item in state.items.values_mut().filter(|i| {
            i.key == key && i.state == ItemState::Pending && i.lease_owner.as_deref() == Some(owner)
        }) {
            touched = true;
            item.lease_owner = None;
            item.lease_expiry = None;
            item.retry_count = retry_count;
            item.last_error = Some(error.to_string());
            if dead {
                item.state = ItemState::Dead;
            } else {
                item.due_time = next_due;
            }
        }
        Ok(match (touched, dead) {
            (false, _) => FailOutcome::LeaseLost,
            (true, true) => FailOutcome::Dead,
            (true, false) => FailOutcome::Rescheduled,
        })
    }

    async fn release_expired_leases(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut state = self.state.lock().await;
        let mut released = 0;
        for item in state.items.values_mut() {
            if item.lease_owner.is_some() && item.lease_expiry.is_some_and(|exp| exp <= now) {
                item.lease_owner = None;
                item.lease_expiry = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn cancel(&self, key: &str) -> Result<usize> {
        let mut state = self.state.lock().await;
        let before = state.items.len();
        state.items.retain(|_, i| {
            !(i.key == key && i.state == ItemState::Pending && i.lease_owner.is_none())
        });
        Ok(before - state.items.len())
    }

    async fn dead_items(&self, limit: usize) -> Result<Vec<ScheduledItem>> {
        let state = self.state.lock().await;
        Ok(state
            .items
            .values()
            .filter(|i| i.state == ItemState::Dead)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn pending_count(&self) -> Result<usize> {
        let state = self.state.lock().await;
        Ok(state
            .items
            .values()
            .filter(|i| i.state == ItemState::Pending)
            .count())
    }
}
