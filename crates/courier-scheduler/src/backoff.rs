//! Capped exponential backoff.

use std::time::Duration;

use courier_core::config::SchedulerConfig;

/// `delay(n) = min(base * 2^n, cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap: cap.max(base) }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.backoff_base(), config.backoff_cap())
    }

    /// Delay before retry number `retry_count` (0 = first retry).
    pub fn delay(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count.min(31)).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.cap, |d| d.min(self.cap))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}
