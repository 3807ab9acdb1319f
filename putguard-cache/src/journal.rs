//! Recent key invalidations, consulted by naked puts.
//!
//! A naked put for a key is refused until the naked-put window that started
//! with the key's last invalidation has passed. Records are kept in a
//! key map for lookups and a FIFO for expiry; expired records are trimmed
//! lazily by later invalidations.

use dashmap::DashMap;
use parking_lot::Mutex;
use putguard_core::duration_millis;
use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// One key invalidation event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalRecord<K> {
    pub key: K,
    /// Naked puts for `key` are legal again once the clock passes this.
    pub expires_at: i64,
}

/// Journal of key invalidations.
pub struct RemovalJournal<K> {
    window: i64,
    expirations: DashMap<K, i64>,
    queue: Mutex<VecDeque<RemovalRecord<K>>>,
    earliest_expiry: AtomicI64,
}

impl<K: Eq + Hash + Clone> RemovalJournal<K> {
    /// Create a journal whose records stay in force for `window`.
    pub fn new(window: Duration) -> Self {
        Self {
            window: duration_millis(window),
            expirations: DashMap::new(),
            queue: Mutex::new(VecDeque::new()),
            earliest_expiry: AtomicI64::new(i64::MAX),
        }
    }

    /// Record that `key` was invalidated at `now`. Returns the record's expiry.
    pub fn record_removal(&self, key: K, now: i64) -> i64 {
        let expires_at = now.saturating_add(self.window);
        self.expirations.insert(key.clone(), expires_at);

        let attempt_trim = now > self.earliest_expiry.load(Ordering::Acquire);
        let expired = {
            let mut queue = self.queue.lock();
            queue.push_back(RemovalRecord { key, expires_at });

            let mut expired = Vec::new();
            if attempt_trim {
                while queue.front().is_some_and(|record| record.expires_at < now) {
                    expired.extend(queue.pop_front());
                }
            }
            if let Some(front) = queue.front() {
                self.earliest_expiry.store(front.expires_at, Ordering::Release);
            }
            expired
        };

        // A newer record for the same key must survive
        for record in expired {
            self.expirations
                .remove_if(&record.key, |_, expiry| *expiry == record.expires_at);
        }
        expires_at
    }

    /// Returns true if no unexpired invalidation is recorded for `key`.
    pub fn is_naked_put_allowed(&self, key: &K, now: i64) -> bool {
        self.expirations
            .get(key)
            .map_or(true, |expiry| now > *expiry.value())
    }

    /// Expiry of the record held for `key`.
    pub fn expiry_for(&self, key: &K) -> Option<i64> {
        self.expirations.get(key).map(|expiry| *expiry.value())
    }

    /// Drop the records superseded by a region mark expiring at `region_mark`.
    ///
    /// Records expiring after the mark were written while the region
    /// invalidation was still running and stay in force.
    pub fn clear(&self, region_mark: i64) {
        let mut queue = self.queue.lock();
        queue.retain(|record| record.expires_at > region_mark);
        self.expirations.retain(|_, expiry| *expiry > region_mark);
        let earliest = queue.front().map_or(i64::MAX, |record| record.expires_at);
        self.earliest_expiry.store(earliest, Ordering::Release);
    }

    /// Records waiting in the FIFO.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Returns true if no records are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn journal() -> RemovalJournal<&'static str> {
        RemovalJournal::new(Duration::from_millis(20_000))
    }

    #[test]
    fn test_naked_put_window() {
        let journal = journal();
        assert!(journal.is_naked_put_allowed(&"a", 0));

        assert_eq!(journal.record_removal("a", 1_000), 21_000);
        assert!(!journal.is_naked_put_allowed(&"a", 1_000));
        assert!(!journal.is_naked_put_allowed(&"a", 21_000));
        assert!(journal.is_naked_put_allowed(&"a", 21_001));
        assert!(journal.is_naked_put_allowed(&"b", 1_000));
    }

    #[test]
    fn test_later_removal_extends_window() {
        let journal = journal();
        journal.record_removal("a", 0);
        journal.record_removal("a", 10_000);
        assert_eq!(journal.expiry_for(&"a"), Some(30_000));
        assert!(!journal.is_naked_put_allowed(&"a", 25_000));
    }

    #[test]
    fn test_expired_records_trimmed() {
        let journal = journal();
        journal.record_removal("a", 0);
        journal.record_removal("b", 1_000);
        assert_eq!(journal.len(), 2);

        journal.record_removal("c", 25_000);
        assert_eq!(journal.len(), 1);
        assert_eq!(journal.expiry_for(&"a"), None);
        assert_eq!(journal.expiry_for(&"b"), None);
        assert_eq!(journal.expiry_for(&"c"), Some(45_000));
    }

    #[test]
    fn test_trim_keeps_newer_record_for_same_key() {
        let journal = journal();
        journal.record_removal("a", 0);
        journal.record_removal("a", 30_000);
        // The stale FIFO record for "a" is gone but the fresh map entry stays
        assert_eq!(journal.len(), 1);
        assert_eq!(journal.expiry_for(&"a"), Some(50_000));
        assert!(!journal.is_naked_put_allowed(&"a", 40_000));
    }

    #[test]
    fn test_unexpired_records_not_trimmed() {
        let journal = journal();
        for (i, key) in ["a", "b", "c"].into_iter().enumerate() {
            journal.record_removal(key, i as i64 * 100);
        }
        assert_eq!(journal.len(), 3);
        assert!(["a", "b", "c"]
            .iter()
            .all(|k| !journal.is_naked_put_allowed(k, 500)));
    }

    #[test]
    fn test_clear() {
        let journal = journal();
        journal.record_removal("a", 0);
        journal.record_removal("b", 5_000);
        journal.clear(25_000);
        assert!(journal.is_empty());
        assert!(journal.is_naked_put_allowed(&"a", 1));
        assert!(journal.is_naked_put_allowed(&"b", 1));
    }

    #[test]
    fn test_clear_keeps_records_outliving_region_mark() {
        let journal = journal();
        journal.record_removal("a", 0);
        journal.record_removal("b", 5_000);
        // Region mark stamped at 0, "b" removed while the region was still running
        journal.clear(20_000);

        assert_eq!(journal.len(), 1);
        assert_eq!(journal.expiry_for(&"a"), None);
        assert_eq!(journal.expiry_for(&"b"), Some(25_000));
        assert!(!journal.is_naked_put_allowed(&"b", 21_000));
        assert!(journal.is_naked_put_allowed(&"b", 25_001));
    }
}
