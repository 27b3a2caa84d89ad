//! Channel send capability: implemented by every delivery integration.

use async_trait::async_trait;

use crate::types::{ChannelJob, ChannelKind, DeliveryResult, FormattedContent};

/// A delivery integration (SMTP, Telegram, webhook, push provider...).
///
/// The dispatcher is channel-agnostic: it only sees this trait.
/// Cancellation is done by dropping the returned future, so implementations
/// must not rely on running to completion.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// Channel this sender delivers on.
    fn kind(&self) -> ChannelKind;

    /// Attempt one delivery. Never panics on provider errors: every failure is
    /// reported as `DeliveryResult::Failed` with a transient/permanent verdict.
    async fn send(&self, job: &ChannelJob, content: &FormattedContent) -> DeliveryResult;
}
