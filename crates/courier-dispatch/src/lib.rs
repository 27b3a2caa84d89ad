//! # Courier Dispatch
//!
//! Decides, per `(notification, channel)`, whether a send still makes sense
//! and drives it through the scheduler.
//!
//! ```text
//! dispatch(request)
//!   └── per channel: tracker ← Scheduled, scheduler.schedule("n:channel", job, delay)
//!
//! job due (JobHandler)
//!   ├── channel already terminal → no-op
//!   ├── condition Skip           → Skipped
//!   └── Proceed → ChannelSender::send
//!          ├── Handled            → Sent / Delivered
//!          ├── transient failure  → Retrying (backoff) … Failed at max attempts
//!          └── permanent failure  → Failed (+ InvalidTargetDetected)
//! ```
//!
//! Outcomes land in the `NotificationTracker`, whose seen/confirmed flags
//! feed the next condition evaluation of every other channel.

pub mod condition;
pub mod dispatcher;
pub mod persistence;
pub mod registry;
pub mod tracker;

pub use condition::{evaluate, Decision};
pub use dispatcher::{ChannelDispatcher, ChannelPlan, DispatchRequest};
pub use persistence::SqliteTracker;
pub use registry::ChannelRegistry;
pub use tracker::{InMemoryTracker, NotificationTracker, OutcomeWrite};
