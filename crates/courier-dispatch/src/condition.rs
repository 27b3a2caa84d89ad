//! Channel condition evaluation: the cross-channel suppression rule.
//!
//! Evaluated right before a send, never at enqueue time, so a channel queued
//! before the user reacted still sees the reaction.

use courier_core::types::{ChannelCondition, UserNotification};

/// Whether a due channel job should go out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Proceed,
    Skip,
}

pub fn evaluate(condition: ChannelCondition, tracking: &UserNotification) -> Decision {
    let proceed = match condition {
        ChannelCondition::Always => true,
        ChannelCondition::IfNotSeen => !tracking.is_seen,
        ChannelCondition::IfNotConfirmed => !tracking.is_confirmed,
    };
    if proceed { Decision::Proceed } else { Decision::Skip }
}
