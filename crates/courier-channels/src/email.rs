//! SMTP email sender (async lettre, STARTTLS).

use async_trait::async_trait;
use courier_core::config::EmailChannelConfig;
use courier_core::error::{CourierError, Result};
use courier_core::traits::ChannelSender;
use courier_core::types::{ChannelJob, ChannelKind, DeliveryResult, FormattedContent};
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

pub struct EmailSender {
    from: Mailbox,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailSender {
    /// Build the transport. No connection is made until the first send.
    pub fn new(config: &EmailChannelConfig) -> Result<Self> {
        let from_name = config.from_name.as_deref().unwrap_or("Courier");
        let from: Mailbox = format!("{from_name} <{}>", config.from_address)
            .parse()
            .map_err(|e| CourierError::Config(format!("Invalid from: {e}")))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| CourierError::Channel(format!("SMTP relay: {e}")))?
            .port(config.smtp_port);
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        Ok(Self {
            from,
            mailer: builder.build(),
        })
    }

    fn build_message(&self, to: Mailbox, content: &FormattedContent) -> Result<Message> {
        let builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(content.subject.as_deref().unwrap_or_default());
        let message = match &content.html {
            Some(html) => builder.multipart(MultiPart::alternative_plain_html(
                content.body.clone(),
                html.clone(),
            )),
            None => builder
                .header(ContentType::TEXT_PLAIN)
                .body(content.body.clone()),
        };
        message.map_err(|e| CourierError::Channel(format!("Build email: {e}")))
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, job: &ChannelJob, content: &FormattedContent) -> DeliveryResult {
        let Some(address) = job.target.as_deref() else {
            return DeliveryResult::permanent("no email address for user");
        };
        let to: Mailbox = match address.parse() {
            Ok(to) => to,
            Err(e) => return DeliveryResult::invalid_target(address, format!("Invalid to: {e}")),
        };
        let email = match self.build_message(to, content) {
            Ok(email) => email,
            Err(e) => return DeliveryResult::permanent(e.to_string()),
        };

        match self.mailer.send(email).await {
            Ok(_) => {
                tracing::info!("📤 Email sent: {}", job.key());
                DeliveryResult::handled()
            }
            Err(e) if e.is_permanent() => DeliveryResult::permanent(format!("SMTP send: {e}")),
            Err(e) => DeliveryResult::transient(format!("SMTP send: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EmailChannelConfig {
        EmailChannelConfig {
            enabled: true,
            smtp_host: "localhost".into(),
            smtp_port: 2525,
            username: String::new(),
            password: String::new(),
            from_address: "noreply@example.com".into(),
            from_name: Some("Billing".into()),
        }
    }

    fn job(target: Option<&str>) -> ChannelJob {
        ChannelJob {
            notification_id: "n1".into(),
            channel: ChannelKind::Email,
            user_id: "u1".into(),
            app_id: "app".into(),
            attempt: 1,
            condition: Default::default(),
            target: target.map(str::to_string),
            content: FormattedContent::text("Invoice", "Ready"),
        }
    }

    #[test]
    fn test_bad_from_address_is_config_error() {
        let mut bad = config();
        bad.from_address = "not an address".into();
        assert!(matches!(EmailSender::new(&bad), Err(CourierError::Config(_))));
    }

    // The SMTP pool needs a running reactor when it is dropped.
    #[tokio::test]
    async fn test_html_message_builds() {
        let sender = EmailSender::new(&config()).unwrap();
        let mut content = FormattedContent::text("Invoice", "Ready");
        content.html = Some("<p>Ready</p>".into());
        let to: Mailbox = "user@example.com".parse().unwrap();
        let formatted = String::from_utf8(sender.build_message(to, &content).unwrap().formatted()).unwrap();
        assert!(formatted.contains("multipart/alternative"));
        assert!(formatted.contains("Subject: Invoice"));
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_reported() {
        let sender = EmailSender::new(&config()).unwrap();
        let job = job(Some("not-an-address"));
        match sender.send(&job, &job.content).await {
            DeliveryResult::Failed {
                transient,
                invalid_target,
                ..
            } => {
                assert!(!transient);
                assert_eq!(invalid_target.as_deref(), Some("not-an-address"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_recipient_is_permanent() {
        let sender = EmailSender::new(&config()).unwrap();
        let job = job(None);
        assert!(matches!(
            sender.send(&job, &job.content).await,
            DeliveryResult::Failed { transient: false, invalid_target: None, .. }
        ));
    }
}
