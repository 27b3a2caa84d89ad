//! In-app web inbox. Delivery is synchronous, so a send is reported as delivered.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::traits::ChannelSender;
use courier_core::types::{ChannelJob, ChannelKind, DeliveryResult, FormattedContent};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// One message in a user's inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxEntry {
    pub notification_id: String,
    pub app_id: String,
    pub content: FormattedContent,
    pub received_at: DateTime<Utc>,
}

/// Bounded per-user inbox; the oldest entry is evicted when full.
pub struct WebInboxSender {
    capacity: usize,
    inboxes: RwLock<HashMap<String, VecDeque<InboxEntry>>>,
}

impl WebInboxSender {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inboxes: RwLock::new(HashMap::new()),
        }
    }

    /// Newest first.
    pub async fn inbox(&self, user_id: &str) -> Vec<InboxEntry> {
        self.inboxes
            .read()
            .await
            .get(user_id)
            .map(|q| q.iter().rev().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChannelSender for WebInboxSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Web
    }

    async fn send(&self, job: &ChannelJob, content: &FormattedContent) -> DeliveryResult {
        let mut inboxes = self.inboxes.write().await;
        let inbox = inboxes.entry(job.user_id.clone()).or_default();
        // A retried job must not show up twice.
        if inbox.iter().any(|e| e.notification_id == job.notification_id) {
            return DeliveryResult::Handled { delivered: true };
        }
        if inbox.len() >= self.capacity {
            inbox.pop_front();
        }
        inbox.push_back(InboxEntry {
            notification_id: job.notification_id.clone(),
            app_id: job.app_id.clone(),
            content: content.clone(),
            received_at: Utc::now(),
        });
        tracing::debug!("📥 Inbox of {} now holds {} message(s)", job.user_id, inbox.len());
        DeliveryResult::Handled { delivered: true }
    }
}
