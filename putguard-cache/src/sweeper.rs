//! Age-based sweeping of abandoned registrations.
//!
//! Tickets are queued as weak references in registration order. A pass
//! inspects a few entries at the head of the recent queue and only the head
//! of the overage queue, so its cost stays constant on the hot path.
//! Reclamation itself needs the registry and is done by the caller; this
//! module only decides which ticket is due.

use parking_lot::Mutex;
use putguard_core::{duration_millis, ValidatorConfig};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use crate::pending::PendingPut;

/// Maximum recent-queue position inspected by one pass.
pub const SWEEP_SCAN_LIMIT: usize = 3;

struct SweepQueues<K> {
    recent: VecDeque<Weak<PendingPut<K>>>,
    overage: VecDeque<Weak<PendingPut<K>>>,
}

/// Two-queue sweeper for pending puts.
pub struct TimeoutSweeper<K> {
    overage_period: i64,
    recent_period: i64,
    max_delay: i64,
    queues: Mutex<SweepQueues<K>>,
}

impl<K> TimeoutSweeper<K> {
    /// Create a sweeper using the periods from `config`.
    pub fn new(config: &ValidatorConfig) -> Self {
        Self {
            overage_period: duration_millis(config.pending_put_overage_period),
            recent_period: duration_millis(config.pending_put_recent_period),
            max_delay: duration_millis(config.max_pending_put_delay),
            queues: Mutex::new(SweepQueues {
                recent: VecDeque::new(),
                overage: VecDeque::new(),
            }),
        }
    }

    /// Queue a freshly registered ticket.
    ///
    /// Runs a pass when other tickets are already waiting and returns the
    /// ticket due for forced reclamation, if any.
    pub fn on_register(&self, ticket: &Arc<PendingPut<K>>) -> Option<Arc<PendingPut<K>>> {
        let mut queues = self.queues.lock();
        queues.recent.push_back(Arc::downgrade(ticket));
        if queues.recent.len() > 1 {
            self.sweep_locked(&mut queues, ticket.timestamp())
        } else {
            None
        }
    }

    /// Run one pass at `now`, returning the ticket due for forced reclamation.
    pub fn sweep(&self, now: i64) -> Option<Arc<PendingPut<K>>> {
        let mut queues = self.queues.lock();
        self.sweep_locked(&mut queues, now)
    }

    /// Put back a ticket whose reclamation could not take its key lock.
    pub fn requeue(&self, ticket: &Arc<PendingPut<K>>, now: i64) {
        ticket.refresh(now);
        self.queues.lock().recent.push_back(Arc::downgrade(ticket));
    }

    /// Entries in the recent queue, live or not.
    pub fn recent_len(&self) -> usize {
        self.queues.lock().recent.len()
    }

    /// Entries in the overage queue, live or not.
    pub fn overage_len(&self) -> usize {
        self.queues.lock().overage.len()
    }

    fn sweep_locked(&self, queues: &mut SweepQueues<K>, now: i64) -> Option<Arc<PendingPut<K>>> {
        let overaged = now.saturating_sub(self.overage_period);
        let recent = now.saturating_sub(self.recent_period);

        let mut pos = 0;
        while pos < queues.recent.len() {
            match queues.recent[pos].upgrade() {
                None => {
                    queues.recent.remove(pos);
                }
                Some(item) if item.is_completed() || item.timestamp() < overaged => {
                    if let Some(moved) = queues.recent.remove(pos) {
                        queues.overage.push_back(moved);
                    }
                }
                Some(item) if item.timestamp() >= recent => break,
                Some(_) if pos >= SWEEP_SCAN_LIMIT => break,
                Some(_) => pos += 1,
            }
        }

        let must_clean = now.saturating_sub(self.max_delay);
        while let Some(head) = queues.overage.front() {
            let Some(item) = head.upgrade() else {
                queues.overage.pop_front();
                continue;
            };
            if item.timestamp() < must_clean {
                queues.overage.pop_front();
                tracing::trace!(age_ms = now - item.timestamp(), "overage head due for reclamation");
                return Some(item);
            }
            break;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use putguard_core::{Owner, TransactionId};
    use std::time::Duration;

    fn config() -> ValidatorConfig {
        ValidatorConfig::default()
            .with_pending_put_recent_period(Duration::from_millis(2_000))
            .with_pending_put_overage_period(Duration::from_millis(5_000))
            .with_max_pending_put_delay(Duration::from_millis(120_000))
    }

    fn ticket(now: i64) -> Arc<PendingPut<u32>> {
        Arc::new(PendingPut::new(
            7,
            Owner::Transaction(TransactionId::new()),
            now,
        ))
    }

    #[test]
    fn test_single_registration_skips_sweep() {
        let sweeper = TimeoutSweeper::new(&config());
        let t = ticket(0);
        assert!(sweeper.on_register(&t).is_none());
        assert_eq!(sweeper.recent_len(), 1);
    }

    #[test]
    fn test_dead_entries_dropped() {
        let sweeper = TimeoutSweeper::new(&config());
        let keep = ticket(0);
        sweeper.on_register(&keep);
        {
            let gone = ticket(0);
            sweeper.on_register(&gone);
        }
        drop(keep);
        assert!(sweeper.sweep(10).is_none());
        assert_eq!(sweeper.recent_len(), 0);
    }

    #[test]
    fn test_young_entry_stops_scan() {
        let sweeper = TimeoutSweeper::new(&config());
        let tickets: Vec<_> = (0..5).map(|_| ticket(1_000)).collect();
        for t in &tickets {
            sweeper.on_register(t);
        }
        assert!(sweeper.sweep(1_500).is_none());
        assert_eq!(sweeper.recent_len(), 5);
        assert_eq!(sweeper.overage_len(), 0);
    }

    #[test]
    fn test_scan_limit_bounds_pass() {
        let sweeper = TimeoutSweeper::new(&config());
        // Between recent and overage thresholds: neither moved nor a stop signal
        let tickets: Vec<_> = (0..6).map(|_| ticket(0)).collect();
        for t in &tickets {
            sweeper.on_register(t);
        }
        sweeper.sweep(3_000);
        assert_eq!(sweeper.recent_len(), 6);
    }

    #[test]
    fn test_overaged_and_completed_move_to_overage() {
        let sweeper = TimeoutSweeper::new(&config());
        let old = ticket(0);
        let done = ticket(9_000);
        done.complete();
        let young = ticket(9_500);
        sweeper.on_register(&old);
        sweeper.on_register(&done);
        sweeper.on_register(&young);

        assert!(sweeper.sweep(10_000).is_none());
        assert_eq!(sweeper.recent_len(), 1);
        assert_eq!(sweeper.overage_len(), 2);
    }

    #[test]
    fn test_overage_head_reclaimed_after_max_delay() {
        let sweeper = TimeoutSweeper::new(&config());
        let stale = ticket(0);
        let other = ticket(0);
        sweeper.on_register(&stale);
        sweeper.on_register(&other);
        sweeper.sweep(6_000);
        assert_eq!(sweeper.overage_len(), 2);

        assert!(sweeper.sweep(100_000).is_none());
        let due = sweeper.sweep(120_001).expect("head due");
        assert!(Arc::ptr_eq(&due, &stale));
        assert_eq!(sweeper.overage_len(), 1);
    }

    #[test]
    fn test_requeue_refreshes_timestamp() {
        let sweeper = TimeoutSweeper::new(&config());
        let t = ticket(0);
        sweeper.requeue(&t, 50_000);
        assert_eq!(t.timestamp(), 50_000);
        assert_eq!(sweeper.recent_len(), 1);
    }
}
