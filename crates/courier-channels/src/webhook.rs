//! Generic HTTP webhook sender: POSTs the notification as JSON.
//! When a secret is configured every request carries a
//! `X-Courier-Signature: t=<unix>,v1=<base64 hmac-sha256>` header over
//! `"<t>.<body>"`.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use courier_core::config::WebhookChannelConfig;
use courier_core::traits::ChannelSender;
use courier_core::types::{ChannelJob, ChannelKind, DeliveryResult, FormattedContent};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::classify::{classify_status, classify_transport};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Courier-Signature";

pub struct WebhookSender {
    config: WebhookChannelConfig,
    client: reqwest::Client,
}

impl WebhookSender {
    pub fn new(config: WebhookChannelConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    fn payload(job: &ChannelJob, content: &FormattedContent) -> serde_json::Value {
        serde_json::json!({
            "notification_id": job.notification_id,
            "user_id": job.user_id,
            "app_id": job.app_id,
            "channel": job.channel,
            "attempt": job.attempt,
            "subject": content.subject,
            "body": content.body,
            "data": content.data,
        })
    }
}

/// `t=<timestamp>,v1=<signature>` for `body` signed at `timestamp`.
pub fn sign(secret: &str, timestamp: i64, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    let digest = mac.finalize().into_bytes();
    Some(format!(
        "t={timestamp},v1={}",
        base64::engine::general_purpose::STANDARD.encode(digest)
    ))
}

#[async_trait]
impl ChannelSender for WebhookSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    async fn send(&self, job: &ChannelJob, content: &FormattedContent) -> DeliveryResult {
        let url = job.target.as_deref().unwrap_or(&self.config.url);
        if url.is_empty() {
            return DeliveryResult::permanent("webhook has no URL");
        }

        let body = match serde_json::to_vec(&Self::payload(job, content)) {
            Ok(body) => body,
            Err(e) => return DeliveryResult::permanent(format!("encode payload: {e}")),
        };

        let mut req = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(secret) = self.config.secret.as_deref().filter(|s| !s.is_empty()) {
            match sign(secret, chrono::Utc::now().timestamp(), &body) {
                Some(signature) => req = req.header(SIGNATURE_HEADER, signature),
                None => return DeliveryResult::permanent("webhook secret rejected by HMAC"),
            }
        }

        let resp = match req.body(body).send().await {
            Ok(resp) => resp,
            Err(e) => return classify_transport(&e),
        };
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let result = classify_status(status, &text, job.target.as_deref());
        if matches!(result, DeliveryResult::Handled { .. }) {
            tracing::info!("✅ Webhook delivered to {}: {}", url, job.key());
        }
        result
    }
}
