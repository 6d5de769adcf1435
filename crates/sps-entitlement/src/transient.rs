//! Session-only channel unlocks.
//!
//! A points-spent temporary unlock grants one viewing session, not a standing
//! right. The set has no serde impls, so nothing can encode it into
//! the persisted layout, and every process starts with it empty.

use std::collections::BTreeSet;

use crate::ChannelId;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransientUnlockCache {
    channels: BTreeSet<ChannelId>,
}

impl TransientUnlockCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the channel was newly added.
    pub fn unlock(&mut self, id: ChannelId) -> bool {
        self.channels.insert(id)
    }

    /// Returns `true` if the channel was present.
    pub fn lock(&mut self, id: &ChannelId) -> bool {
        self.channels.remove(id)
    }

    pub fn contains(&self, id: &ChannelId) -> bool {
        self.channels.contains(id)
    }

    pub fn clear(&mut self) {
        self.channels.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelId> {
        self.channels.iter()
    }
}
