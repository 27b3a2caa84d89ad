//! Channel registry: which `ChannelSender` serves which channel.

use std::collections::HashMap;
use std::sync::Arc;

use courier_core::traits::ChannelSender;
use courier_core::types::ChannelKind;

/// One sender per channel kind; a later registration replaces the earlier one.
#[derive(Default, Clone)]
pub struct ChannelRegistry {
    senders: HashMap<ChannelKind, Arc<dyn ChannelSender>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.register(sender);
        self
    }

    pub fn register(&mut self, sender: Arc<dyn ChannelSender>) {
        let kind = sender.kind();
        if self.senders.insert(kind, sender).is_some() {
            tracing::warn!("⚠️ Sender for '{}' replaced", kind);
        } else {
            tracing::info!("📡 Channel '{}' registered", kind);
        }
    }

    pub fn get(&self, kind: ChannelKind) -> Option<Arc<dyn ChannelSender>> {
        self.senders.get(&kind).cloned()
    }

    pub fn contains(&self, kind: ChannelKind) -> bool {
        self.senders.contains_key(&kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<ChannelKind> {
        let mut kinds: Vec<_> = self.senders.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}
