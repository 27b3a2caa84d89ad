//! Scheduled work items and claimed batches.

use chrono::{DateTime, Utc};
use courier_core::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a stored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Pending,
    /// Retries exhausted; kept for inspection, never claimed again.
    Dead,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemState::Pending => "pending",
            ItemState::Dead => "dead",
        }
    }
}

/// One unit of deferred work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledItem {
    /// Store-assigned sequence, increasing in insertion order.
    pub id: i64,
    pub key: String,
    pub payload: Vec<u8>,
    pub due_time: DateTime<Utc>,
    pub retry_count: u32,
    pub lease_owner: Option<String>,
    pub lease_expiry: Option<DateTime<Utc>>,
    pub state: ItemState,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledItem {
    pub fn is_leased_at(&self, now: DateTime<Utc>) -> bool {
        self.lease_owner.is_some() && self.lease_expiry.is_some_and(|exp| exp > now)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Items sharing one key, claimed together for a single execution.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerBatch {
    pub key: String,
    /// Ordered by id, oldest first.
    pub items: Vec<ScheduledItem>,
    /// Highest retry count among the items.
    pub retry_count: u32,
    pub lease_expiry: DateTime<Utc>,
}

impl SchedulerBatch {
    pub fn new(key: String, mut items: Vec<ScheduledItem>, lease_expiry: DateTime<Utc>) -> Self {
        items.sort_by_key(|i| i.id);
        let retry_count = items.iter().map(|i| i.retry_count).max().unwrap_or(0);
        Self {
            key,
            items,
            retry_count,
            lease_expiry,
        }
    }

    /// The most recent submission, which is the current payload.
    pub fn latest(&self) -> Option<&ScheduledItem> {
        self.items.last()
    }

    pub fn decode_latest<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.latest().map(|item| item.decode()).transpose()
    }
}
