//! # Courier Channels
//!
//! `ChannelSender` implementations. Each one maps provider responses onto
//! `DeliveryResult`, reporting permanently invalid recipients so they can be
//! pruned upstream.

pub mod classify;
pub mod email;
pub mod telegram;
pub mod web;
pub mod webhook;

use std::sync::Arc;

use courier_core::config::ChannelsConfig;
use courier_core::traits::ChannelSender;

pub use email::EmailSender;
pub use telegram::TelegramSender;
pub use web::{InboxEntry, WebInboxSender};
pub use webhook::WebhookSender;

/// Build the enabled senders from config.
/// Misconfigured channels are logged and left out.
pub fn senders_from_config(config: &ChannelsConfig) -> Vec<Arc<dyn ChannelSender>> {
    let mut senders: Vec<Arc<dyn ChannelSender>> = Vec::new();

    if let Some(wh) = &config.webhook
        && wh.enabled
    {
        senders.push(Arc::new(WebhookSender::new(wh.clone())));
    }

    if let Some(tg) = &config.telegram
        && tg.enabled
    {
        if tg.bot_token.is_empty() {
            tracing::warn!("⚠️ Telegram enabled without bot_token, skipping");
        } else {
            senders.push(Arc::new(TelegramSender::new(tg.clone())));
        }
    }

    if let Some(em) = &config.email
        && em.enabled
    {
        match EmailSender::new(em) {
            Ok(sender) => senders.push(Arc::new(sender)),
            Err(e) => tracing::warn!("⚠️ Email channel disabled: {e}"),
        }
    }

    // In-app inbox needs no provider.
    if config.web.enabled {
        senders.push(Arc::new(WebInboxSender::new(config.web.inbox_capacity)));
    }

    senders
}
