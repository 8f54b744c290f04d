//! Connection counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-connection traffic counters. All updates are relaxed; the numbers
/// are advisory.
#[derive(Debug, Default)]
pub struct ConnStats {
    actions_sent: AtomicU64,
    fragments_sent: AtomicU64,
    bytes_sent: AtomicU64,
    actions_received: AtomicU64,
    bytes_received: AtomicU64,
}

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub actions_sent: u64,
    pub fragments_sent: u64,
    pub bytes_sent: u64,
    pub actions_received: u64,
    pub bytes_received: u64,
}

impl ConnStats {
    /// Record a submitted action.
    pub fn record_action_sent(&self, bytes: usize, fragments: usize) {
        self.actions_sent.fetch_add(1, Ordering::Relaxed);
        self.fragments_sent
            .fetch_add(fragments as u64, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a delivered ordered action.
    pub fn record_action_received(&self, bytes: usize) {
        self.actions_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Copy the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            actions_sent: self.actions_sent.load(Ordering::Relaxed),
            fragments_sent: self.fragments_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            actions_received: self.actions_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}
