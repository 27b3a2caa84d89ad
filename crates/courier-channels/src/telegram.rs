//! Telegram Bot API sender: `sendMessage` to the job's chat id.

use std::time::Duration;

use async_trait::async_trait;
use courier_core::config::TelegramChannelConfig;
use courier_core::traits::ChannelSender;
use courier_core::types::{ChannelJob, ChannelKind, DeliveryResult, FormattedContent};
use reqwest::StatusCode;

use crate::classify::{classify_status, classify_transport};

pub struct TelegramSender {
    config: TelegramChannelConfig,
    client: reqwest::Client,
}

impl TelegramSender {
    pub fn new(config: TelegramChannelConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token
        )
    }
}

/// Markdown (v1) message text.
fn render(content: &FormattedContent) -> String {
    match &content.subject {
        Some(subject) => format!(
            "*{}*\n\n{}",
            escape_markdown(subject),
            escape_markdown(&content.body)
        ),
        None => escape_markdown(&content.body),
    }
}

/// Escape Telegram MarkdownV1 special characters.
fn escape_markdown(s: &str) -> String {
    s.replace('_', "\\_")
        .replace('*', "\\*")
        .replace('[', "\\[")
        .replace('`', "\\`")
}

/// Blocked bots and unknown chats never recover; everything else follows HTTP rules.
fn classify(status: StatusCode, body: &str, chat_id: &str) -> DeliveryResult {
    let description = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["description"].as_str().map(str::to_string))
        .unwrap_or_default();
    let lowered = description.to_lowercase();
    let gone = status == StatusCode::FORBIDDEN
        || (status == StatusCode::BAD_REQUEST && lowered.contains("chat not found"));
    if gone {
        return DeliveryResult::invalid_target(chat_id, format!("Telegram {status}: {description}"));
    }
    classify_status(status, body, Some(chat_id))
}

#[async_trait]
impl ChannelSender for TelegramSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    async fn send(&self, job: &ChannelJob, content: &FormattedContent) -> DeliveryResult {
        let Some(chat_id) = job.target.as_deref().filter(|c| !c.is_empty()) else {
            return DeliveryResult::permanent("no Telegram chat id for user");
        };

        let resp = match self
            .client
            .post(self.endpoint())
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": render(content),
                "parse_mode": "Markdown"
            }))
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return classify_transport(&e),
        };

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let result = classify(status, &body, chat_id);
        if matches!(result, DeliveryResult::Handled { .. }) {
            tracing::info!("✅ Telegram message sent: {}", job.key());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_escapes_markdown() {
        let content = FormattedContent::text("Build_42", "*done*");
        assert_eq!(render(&content), "*Build\\_42*\n\n\\*done\\*");
    }

    #[test]
    fn test_blocked_bot_is_invalid_target() {
        let body = r#"{"ok":false,"error_code":403,"description":"Forbidden: bot was blocked by the user"}"#;
        match classify(StatusCode::FORBIDDEN, body, "42") {
            DeliveryResult::Failed { invalid_target, .. } => {
                assert_eq!(invalid_target.as_deref(), Some("42"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_chat_not_found_and_throttling() {
        let missing = r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#;
        assert!(matches!(
            classify(StatusCode::BAD_REQUEST, missing, "42"),
            DeliveryResult::Failed { invalid_target: Some(_), .. }
        ));
        assert!(matches!(
            classify(StatusCode::TOO_MANY_REQUESTS, "{}", "42"),
            DeliveryResult::Failed { transient: true, .. }
        ));
    }

    #[test]
    fn test_endpoint_trims_slash() {
        let sender = TelegramSender::new(TelegramChannelConfig {
            enabled: true,
            bot_token: "123:abc".into(),
            api_base: "http://localhost:8081/".into(),
        });
        assert_eq!(sender.endpoint(), "http://localhost:8081/bot123:abc/sendMessage");
    }
}
