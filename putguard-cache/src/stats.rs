//! Validator counters and point-in-time statistics.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of validator bookkeeping and outcome counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidatorStats {
    /// Keys with at least one tracked registration map
    pub tracked_keys: usize,
    /// Entries in the sweeper's recent queue
    pub recent_queue_len: usize,
    /// Entries in the sweeper's overage queue
    pub overage_queue_len: usize,
    /// Invalidation records awaiting expiry
    pub removal_queue_len: usize,
    /// Acquires that returned a permit
    pub puts_granted: u64,
    /// Acquires refused for a registered key
    pub puts_rejected: u64,
    /// Acquires refused because a naked put was not allowed
    pub naked_puts_rejected: u64,
    /// Invalidations that gave up waiting for a key lock
    pub invalidation_timeouts: u64,
    /// Abandoned registrations removed by the sweeper
    pub reclaimed_registrations: u64,
}

impl ValidatorStats {
    /// Fraction of acquires that were refused.
    pub fn rejection_rate(&self) -> f64 {
        let refused = self.puts_rejected + self.naked_puts_rejected;
        let total = self.puts_granted + refused;
        if total == 0 {
            0.0
        } else {
            refused as f64 / total as f64
        }
    }
}

/// Live counters behind [`ValidatorStats`].
#[derive(Debug, Default)]
pub(crate) struct ValidatorCounters {
    puts_granted: AtomicU64,
    puts_rejected: AtomicU64,
    naked_puts_rejected: AtomicU64,
    invalidation_timeouts: AtomicU64,
    reclaimed_registrations: AtomicU64,
}

impl ValidatorCounters {
    pub(crate) fn record_granted(&self) {
        self.puts_granted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.puts_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_naked_rejected(&self) {
        self.naked_puts_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_invalidation_timeout(&self) {
        self.invalidation_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reclaimed(&self) {
        self.reclaimed_registrations.fetch_add(1, Ordering::Relaxed);
    }

    /// Fill the counter fields of `stats`.
    pub(crate) fn fill(&self, stats: &mut ValidatorStats) {
        stats.puts_granted = self.puts_granted.load(Ordering::Relaxed);
        stats.puts_rejected = self.puts_rejected.load(Ordering::Relaxed);
        stats.naked_puts_rejected = self.naked_puts_rejected.load(Ordering::Relaxed);
        stats.invalidation_timeouts = self.invalidation_timeouts.load(Ordering::Relaxed);
        stats.reclaimed_registrations = self.reclaimed_registrations.load(Ordering::Relaxed);
    }
}
