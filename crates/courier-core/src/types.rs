//! Channel data model: jobs, send outcomes and the per-notification tracking view.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CourierError;

/// A delivery medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    Sms,
    MobilePush,
    WebPush,
    /// In-app web inbox.
    Web,
    Webhook,
    Telegram,
    Slack,
    Discord,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 9] = [
        ChannelKind::Email,
        ChannelKind::Sms,
        ChannelKind::MobilePush,
        ChannelKind::WebPush,
        ChannelKind::Web,
        ChannelKind::Webhook,
        ChannelKind::Telegram,
        ChannelKind::Slack,
        ChannelKind::Discord,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Sms => "sms",
            ChannelKind::MobilePush => "mobile_push",
            ChannelKind::WebPush => "web_push",
            ChannelKind::Web => "web",
            ChannelKind::Webhook => "webhook",
            ChannelKind::Telegram => "telegram",
            ChannelKind::Slack => "slack",
            ChannelKind::Discord => "discord",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChannelKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| CourierError::NotFound(format!("unknown channel '{s}'")))
    }
}

/// Per-channel policy deciding whether a send still makes sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelCondition {
    #[default]
    Always,
    IfNotSeen,
    IfNotConfirmed,
}

/// Whether the notification expects an explicit user confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmMode {
    Explicit,
    #[default]
    None,
}

impl ConfirmMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmMode::Explicit => "explicit",
            ConfirmMode::None => "none",
        }
    }
}

/// Already-rendered content handed to a channel sender.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormattedContent {
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
    #[serde(default)]
    pub html: Option<String>,
    /// Free-form data for channels that carry structured payloads (push, webhook).
    #[serde(default)]
    pub data: serde_json::Value,
}

impl FormattedContent {
    pub fn text(subject: &str, body: &str) -> Self {
        Self {
            subject: Some(subject.to_string()),
            body: body.to_string(),
            html: None,
            data: serde_json::Value::Null,
        }
    }
}

/// One channel attempt for one user notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelJob {
    pub notification_id: String,
    pub channel: ChannelKind,
    pub user_id: String,
    pub app_id: String,
    /// 1-based attempt number, filled in by the dispatcher at execution time.
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub condition: ChannelCondition,
    /// Recipient on this channel: address, push token, chat id, URL.
    #[serde(default)]
    pub target: Option<String>,
    pub content: FormattedContent,
}

impl ChannelJob {
    /// Scheduler dedup key for a `(notification, channel)` pair.
    pub fn schedule_key(notification_id: &str, channel: ChannelKind) -> String {
        format!("{notification_id}:{channel}")
    }

    pub fn key(&self) -> String {
        Self::schedule_key(&self.notification_id, self.channel)
    }
}

/// Send outcome state of one `(notification, channel)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    Scheduled,
    Attempt,
    /// Transient failure, another attempt is scheduled.
    Retrying,
    Sent,
    Delivered,
    Skipped,
    /// Terminal failure, no further attempts.
    Failed,
}

impl SendStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SendStatus::Sent | SendStatus::Delivered | SendStatus::Skipped | SendStatus::Failed
        )
    }

    /// Forward-only transition check used by the tracker.
    pub fn can_transition_to(&self, next: SendStatus) -> bool {
        match self {
            SendStatus::Scheduled => true,
            SendStatus::Attempt | SendStatus::Retrying => next != SendStatus::Scheduled,
            SendStatus::Sent => next == SendStatus::Delivered,
            SendStatus::Delivered | SendStatus::Skipped | SendStatus::Failed => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SendStatus::Scheduled => "scheduled",
            SendStatus::Attempt => "attempt",
            SendStatus::Retrying => "retrying",
            SendStatus::Sent => "sent",
            SendStatus::Delivered => "delivered",
            SendStatus::Skipped => "skipped",
            SendStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SendStatus {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "scheduled" => SendStatus::Scheduled,
            "attempt" => SendStatus::Attempt,
            "retrying" => SendStatus::Retrying,
            "sent" => SendStatus::Sent,
            "delivered" => SendStatus::Delivered,
            "skipped" => SendStatus::Skipped,
            "failed" => SendStatus::Failed,
            other => return Err(CourierError::NotFound(format!("unknown send status '{other}'"))),
        })
    }
}

/// Outcome record for one channel of one notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSendInfo {
    pub status: SendStatus,
    pub last_update: DateTime<Utc>,
    /// Provider error text or skip reason.
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub attempt: u32,
}

impl ChannelSendInfo {
    pub fn new(status: SendStatus) -> Self {
        Self {
            status,
            last_update: Utc::now(),
            detail: None,
            attempt: 0,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn at(mut self, when: DateTime<Utc>) -> Self {
        self.last_update = when;
        self
    }
}

/// Aggregated status of a whole notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Seen,
    Confirmed,
    Failed,
}

/// Tracking view of one user notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserNotification {
    pub id: String,
    pub user_id: String,
    pub app_id: String,
    #[serde(default)]
    pub confirm_mode: ConfirmMode,
    #[serde(default)]
    pub is_seen: bool,
    #[serde(default)]
    pub seen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_confirmed: bool,
    #[serde(default)]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub channels: BTreeMap<ChannelKind, ChannelSendInfo>,
    pub created_at: DateTime<Utc>,
}

impl UserNotification {
    pub fn new(id: &str, user_id: &str, app_id: &str, confirm_mode: ConfirmMode) -> Self {
        Self {
            id: id.to_string(),
            user_id: user_id.to_string(),
            app_id: app_id.to_string(),
            confirm_mode,
            is_seen: false,
            seen_at: None,
            is_confirmed: false,
            confirmed_at: None,
            channels: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn channel_status(&self, channel: ChannelKind) -> Option<SendStatus> {
        self.channels.get(&channel).map(|info| info.status)
    }

    /// Confirmation outranks seen, seen outranks sent. Failed only when every
    /// channel has finished and none of them got through.
    pub fn overall_status(&self) -> NotificationStatus {
        if self.is_confirmed {
            return NotificationStatus::Confirmed;
        }
        if self.is_seen {
            return NotificationStatus::Seen;
        }
        let statuses: Vec<SendStatus> = self.channels.values().map(|c| c.status).collect();
        if statuses
            .iter()
            .any(|s| matches!(s, SendStatus::Sent | SendStatus::Delivered))
        {
            return NotificationStatus::Sent;
        }
        if !statuses.is_empty()
            && statuses.iter().all(|s| s.is_terminal())
            && statuses.contains(&SendStatus::Failed)
        {
            return NotificationStatus::Failed;
        }
        NotificationStatus::Pending
    }
}

/// Result of one `ChannelSender::send` call.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryResult {
    /// Provider accepted the message. `delivered` is set when the channel
    /// confirms delivery synchronously (in-app inbox).
    Handled { delivered: bool },
    Failed {
        transient: bool,
        reason: String,
        /// Recipient the provider rejected as permanently invalid (stale token, unknown chat).
        invalid_target: Option<String>,
    },
}

impl DeliveryResult {
    pub fn handled() -> Self {
        DeliveryResult::Handled { delivered: false }
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        DeliveryResult::Failed {
            transient: true,
            reason: reason.into(),
            invalid_target: None,
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        DeliveryResult::Failed {
            transient: false,
            reason: reason.into(),
            invalid_target: None,
        }
    }

    pub fn invalid_target(target: impl Into<String>, reason: impl Into<String>) -> Self {
        DeliveryResult::Failed {
            transient: false,
            reason: reason.into(),
            invalid_target: Some(target.into()),
        }
    }
}
