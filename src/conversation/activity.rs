//! Channel activity tracking for recency-based eviction.

use crate::ChannelId;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// Last-activity timestamps per channel.
///
/// Touched on every outbound send and every observed inbound event. Channels
/// the ledger has never seen rank as the oldest, so they are preferred as
/// eviction victims over anything with recorded traffic.
#[derive(Default)]
pub struct ActivityLedger {
    entries: Mutex<HashMap<ChannelId, Instant>>,
}

impl ActivityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record activity on a channel.
    pub fn touch(&self, channel_id: ChannelId) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(channel_id, Instant::now());
        }
    }

    /// Forget a channel, typically after deleting it.
    pub fn forget(&self, channel_id: ChannelId) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(&channel_id);
        }
    }

    /// Last recorded activity for a channel.
    pub fn last_activity(&self, channel_id: ChannelId) -> Option<Instant> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(&channel_id).copied())
    }
}
