//! # Courier Core
//!
//! Shared building blocks for the Courier notification engine:
//! error type, configuration, the channel data model, the
//! `ChannelSender` capability and the dispatch event bus.

pub mod config;
pub mod error;
pub mod events;
pub mod traits;
pub mod types;

pub use config::CourierConfig;
pub use error::{CourierError, Result};
pub use events::{DispatchEvent, EventBus};
pub use traits::ChannelSender;
pub use types::{
    ChannelCondition, ChannelJob, ChannelKind, ChannelSendInfo, ConfirmMode, DeliveryResult,
    FormattedContent, NotificationStatus, SendStatus, UserNotification,
};
