//! Courier configuration system.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CourierError, Result};
use crate::types::{ChannelCondition, ChannelKind};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourierConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub channel: ChannelsConfig,
}

impl CourierConfig {
    /// Load config from the default path (~/.courier/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CourierError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CourierError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CourierError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Courier home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".courier")
    }

    /// Reject settings the engine cannot run safely with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.scheduler;
        if s.poll_interval_ms == 0 {
            return Err(CourierError::Config("scheduler.poll_interval_ms must be > 0".into()));
        }
        if s.claim_batch_size == 0 || s.worker_concurrency == 0 {
            return Err(CourierError::Config(
                "scheduler.claim_batch_size and worker_concurrency must be > 0".into(),
            ));
        }
        if s.backoff_base() > s.backoff_cap() {
            return Err(CourierError::Config(
                "scheduler.backoff_base_ms exceeds backoff_cap_secs".into(),
            ));
        }
        // An expired lease lets another worker re-run the batch while this one still is.
        if s.lease_duration_secs <= s.handler_timeout_secs {
            return Err(CourierError::Config(format!(
                "scheduler.lease_duration_secs ({}) must exceed handler_timeout_secs ({})",
                s.lease_duration_secs, s.handler_timeout_secs
            )));
        }
        if self.dispatch.max_attempts == 0 {
            return Err(CourierError::Config("dispatch.max_attempts must be > 0".into()));
        }
        for name in self.dispatch.default_conditions.keys() {
            name.parse::<ChannelKind>()
                .map_err(|_| CourierError::Config(format!("unknown channel in dispatch.default_conditions: {name}")))?;
        }
        Ok(())
    }
}

/// Scheduler engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_claim_batch_size")]
    pub claim_batch_size: usize,
    #[serde(default = "default_lease_duration_secs")]
    pub lease_duration_secs: u64,
    /// Retries the store allows before dead-lettering a key.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_poll_interval_ms() -> u64 { 2000 }
fn default_claim_batch_size() -> usize { 32 }
fn default_lease_duration_secs() -> u64 { 60 }
fn default_max_retries() -> u32 { 5 }
fn default_backoff_base_ms() -> u64 { 1000 }
fn default_backoff_cap_secs() -> u64 { 300 }
fn default_worker_concurrency() -> usize { 8 }
fn default_handler_timeout_secs() -> u64 { 45 }
fn default_shutdown_timeout_secs() -> u64 { 30 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            claim_batch_size: default_claim_batch_size(),
            lease_duration_secs: default_lease_duration_secs(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_secs: default_backoff_cap_secs(),
            worker_concurrency: default_worker_concurrency(),
            handler_timeout_secs: default_handler_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_secs(self.backoff_cap_secs)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Channel dispatch policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Total send attempts per `(notification, channel)` before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    /// Condition applied when a dispatch request names none, keyed by channel name.
    #[serde(default)]
    pub default_conditions: BTreeMap<String, ChannelCondition>,
}

fn default_max_attempts() -> u32 { 5 }
fn default_send_timeout_secs() -> u64 { 30 }

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            send_timeout_secs: default_send_timeout_secs(),
            default_conditions: BTreeMap::new(),
        }
    }
}

impl DispatchConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn condition_for(&self, channel: ChannelKind) -> ChannelCondition {
        self.default_conditions
            .get(channel.as_str())
            .copied()
            .unwrap_or_default()
    }
}

/// Where the scheduler and tracker keep their state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: String,
}

fn default_storage_path() -> String { "~/.courier/courier.db".into() }

impl Default for StorageConfig {
    fn default() -> Self {
        Self { path: default_storage_path() }
    }
}

impl StorageConfig {
    /// Storage path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

/// Channel sender configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub webhook: Option<WebhookChannelConfig>,
    #[serde(default)]
    pub telegram: Option<TelegramChannelConfig>,
    #[serde(default)]
    pub email: Option<EmailChannelConfig>,
    #[serde(default)]
    pub web: WebChannelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Fallback URL when a job carries no target.
    #[serde(default)]
    pub url: String,
    /// HMAC-SHA256 signing secret.
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    pub bot_token: String,
    #[serde(default = "default_telegram_api")]
    pub api_base: String,
}

fn default_telegram_api() -> String { "https://api.telegram.org".into() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub from_address: String,
    #[serde(default)]
    pub from_name: Option<String>,
}

fn default_smtp_port() -> u16 { 587 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebChannelConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Messages kept per user inbox.
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
}

fn bool_true() -> bool { true }
fn default_inbox_capacity() -> usize { 100 }

impl Default for WebChannelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            inbox_capacity: default_inbox_capacity(),
        }
    }
}
