//! Registry of in-flight pending puts.
//!
//! Each cache key maps to a [`PendingSlots`] collection guarded by its own
//! lock. The outer key map only ever needs atomic insert-if-absent and
//! compare-and-remove; all per-key mutation happens under the key lock.
//!
//! # Lock order
//!
//! A key lock may be held while touching the outer map, never the other
//! way round: outer map references are cloned out and dropped before any
//! key lock is waited on.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use putguard_core::Owner;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// PENDING PUT (ticket)
// ============================================================================

/// One outstanding "I intend to cache a value for this key" ticket.
///
/// Once `completed` is set the ticket is a tombstone: it is never
/// resurrected, whether it was consumed by a claim or invalidated in place.
pub struct PendingPut<K> {
    key: K,
    owner: Owner,
    timestamp: AtomicI64,
    completed: AtomicBool,
}

impl<K> PendingPut<K> {
    /// Create a ticket registered at `now`.
    pub fn new(key: K, owner: Owner, now: i64) -> Self {
        Self {
            key,
            owner,
            timestamp: AtomicI64::new(now),
            completed: AtomicBool::new(false),
        }
    }

    /// The cache key this ticket guards.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// The owner allowed to claim this ticket.
    pub fn owner(&self) -> Owner {
        self.owner
    }

    /// Registration time, or the time of the last refresh.
    pub fn timestamp(&self) -> i64 {
        self.timestamp.load(Ordering::Acquire)
    }

    /// Whether the ticket has been consumed or invalidated.
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Mark the ticket completed. Returns true if this call completed it.
    pub(crate) fn complete(&self) -> bool {
        !self.completed.swap(true, Ordering::AcqRel)
    }

    /// Give the ticket a new lease so it cycles through the sweep queues again.
    pub(crate) fn refresh(&self, now: i64) {
        self.timestamp.store(now, Ordering::Release);
    }
}

impl<K: fmt::Debug> fmt::Debug for PendingPut<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingPut")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .field("timestamp", &self.timestamp())
            .field("completed", &self.is_completed())
            .finish()
    }
}

// ============================================================================
// PENDING SLOTS (per-key collection)
// ============================================================================

/// Pending puts for one key, at most one per owner.
///
/// Optimized for the usual case of a single pending put per key; promotes
/// to a full owner map on the second registration. Not synchronized on its
/// own: always accessed under the key lock.
#[derive(Debug)]
pub enum PendingSlots<K> {
    /// No tickets
    Empty,
    /// Exactly one ticket
    Single(Arc<PendingPut<K>>),
    /// Owner to ticket map
    Many(HashMap<Owner, Arc<PendingPut<K>>>),
}

impl<K> Default for PendingSlots<K> {
    fn default() -> Self {
        PendingSlots::Empty
    }
}

impl<K> PendingSlots<K> {
    /// Slots holding a single ticket.
    pub fn single(ticket: Arc<PendingPut<K>>) -> Self {
        PendingSlots::Single(ticket)
    }

    /// Add a ticket, returning any ticket it displaced for the same owner.
    pub fn put(&mut self, ticket: Arc<PendingPut<K>>) -> Option<Arc<PendingPut<K>>> {
        match std::mem::take(self) {
            PendingSlots::Empty => {
                *self = PendingSlots::Single(ticket);
                None
            }
            PendingSlots::Single(existing) => {
                // Second put; need a map
                let mut map = HashMap::with_capacity(4);
                map.insert(existing.owner(), existing);
                let displaced = map.insert(ticket.owner(), ticket);
                *self = PendingSlots::Many(map);
                displaced
            }
            PendingSlots::Many(mut map) => {
                let displaced = map.insert(ticket.owner(), ticket);
                *self = PendingSlots::Many(map);
                displaced
            }
        }
    }

    /// Remove the ticket held by `owner`.
    pub fn remove(&mut self, owner: &Owner) -> Option<Arc<PendingPut<K>>> {
        let single_match = matches!(self, PendingSlots::Single(t) if t.owner() == *owner);
        if single_match {
            return match std::mem::take(self) {
                PendingSlots::Single(ticket) => Some(ticket),
                _ => None,
            };
        }
        match self {
            PendingSlots::Many(map) => map.remove(owner),
            _ => None,
        }
    }

    /// Number of tickets held.
    pub fn len(&self) -> usize {
        match self {
            PendingSlots::Empty => 0,
            PendingSlots::Single(_) => 1,
            PendingSlots::Many(map) => map.len(),
        }
    }

    /// Returns true if no tickets are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark every ticket completed in place. Returns how many were newly completed.
    pub fn invalidate(&self) -> usize {
        match self {
            PendingSlots::Empty => 0,
            PendingSlots::Single(ticket) => usize::from(ticket.complete()),
            PendingSlots::Many(map) => map.values().filter(|t| t.complete()).count(),
        }
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

type SharedSlots<K> = Arc<Mutex<PendingSlots<K>>>;
type SlotsGuard<K> = ArcMutexGuard<RawMutex, PendingSlots<K>>;

/// A key whose lock is held after a successful claim.
pub struct ClaimedKey<K> {
    key: K,
    slots: SharedSlots<K>,
    guard: SlotsGuard<K>,
}

impl<K> ClaimedKey<K> {
    /// The claimed key.
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: fmt::Debug> fmt::Debug for ClaimedKey<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimedKey")
            .field("key", &self.key)
            .field("remaining", &self.guard.len())
            .finish()
    }
}

/// Outcome of [`PendingRegistry::try_claim`].
#[derive(Debug)]
pub enum Claim<K> {
    /// Nothing is registered for the key.
    Untracked,
    /// The key lock could not be acquired in time.
    Busy,
    /// No live ticket for this owner: never registered, or invalidated.
    Rejected,
    /// The owner's ticket was consumed; the key lock stays held.
    Granted(ClaimedKey<K>),
}

/// Outcome of [`PendingRegistry::reclaim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reclaim {
    /// The ticket was removed from its key.
    Reclaimed,
    /// The key lock could not be acquired in time.
    Busy,
    /// The ticket is no longer registered.
    Gone,
}

/// Concurrent map of cache key to pending puts.
pub struct PendingRegistry<K> {
    maps: DashMap<K, SharedSlots<K>>,
}

impl<K: Eq + Hash + Clone> Default for PendingRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> PendingRegistry<K> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            maps: DashMap::new(),
        }
    }

    /// Register a ticket under its key.
    ///
    /// Insertion into an untracked key never blocks. Joining an existing key
    /// waits up to `lock_timeout` for that key's lock; returns false if the
    /// wait timed out. The registration did not take, so the owner's later
    /// claim is rejected while the key stays tracked and is only treated as
    /// naked once the key has been retired.
    pub fn register(&self, ticket: &Arc<PendingPut<K>>, lock_timeout: Duration) -> bool {
        let key = ticket.key();
        loop {
            let existing = match self.maps.entry(key.clone()) {
                Entry::Occupied(entry) => Arc::clone(entry.get()),
                Entry::Vacant(entry) => {
                    entry.insert(Arc::new(Mutex::new(PendingSlots::single(Arc::clone(
                        ticket,
                    )))));
                    return true;
                }
            };

            let Some(mut slots) = existing.try_lock_for(lock_timeout) else {
                return false;
            };
            slots.put(Arc::clone(ticket));

            // The slots may have been retired while we waited for the lock
            let current = Arc::clone(
                self.maps
                    .entry(key.clone())
                    .or_insert_with(|| Arc::clone(&existing))
                    .value(),
            );
            if Arc::ptr_eq(&current, &existing) {
                return true;
            }
        }
    }

    /// Consume the ticket `owner` holds for `key`.
    ///
    /// On [`Claim::Granted`] the key lock stays held until the claim is passed
    /// to [`PendingRegistry::release`].
    pub fn try_claim(&self, key: &K, owner: &Owner, timeout: Duration) -> Claim<K> {
        let Some(slots) = self.get(key) else {
            return Claim::Untracked;
        };
        let Some(mut guard) = slots.try_lock_arc_for(timeout) else {
            return Claim::Busy;
        };

        let removed = guard.remove(owner);
        match removed {
            Some(ticket) if ticket.complete() => Claim::Granted(ClaimedKey {
                key: key.clone(),
                slots,
                guard,
            }),
            _ => {
                self.retire_if_empty(key, &slots, &guard);
                Claim::Rejected
            }
        }
    }

    /// Drop the ticket `owner` holds for `key` without claiming it.
    ///
    /// Used when the read that registered it will not put after all. Returns
    /// false if the key lock stayed busy, leaving the ticket to the sweeper.
    pub fn withdraw(&self, key: &K, owner: &Owner, timeout: Duration) -> bool {
        let Some(slots) = self.get(key) else {
            return true;
        };
        let Some(mut guard) = slots.try_lock_for(timeout) else {
            return false;
        };
        if let Some(ticket) = guard.remove(owner) {
            ticket.complete();
        }
        self.retire_if_empty(key, &slots, &guard);
        true
    }

    /// Release a claimed key, retiring its slots if they are now empty.
    pub fn release(&self, claimed: ClaimedKey<K>) {
        let ClaimedKey { key, slots, guard } = claimed;
        self.retire_if_empty(&key, &slots, &guard);
        drop(guard);
    }

    /// Mark every ticket for `key` completed.
    ///
    /// Waits up to `timeout` for the key lock so that any claim in progress
    /// finishes first. Returns false if the wait timed out.
    pub fn invalidate(&self, key: &K, timeout: Duration) -> bool {
        let Some(slots) = self.get(key) else {
            return true;
        };
        let invalidated = match slots.try_lock_for(timeout) {
            Some(guard) => {
                guard.invalidate();
                true
            }
            None => false,
        };
        invalidated
    }

    /// Mark every ticket for every currently tracked key completed.
    ///
    /// Works from a snapshot of the tracked keys; keys registered after the
    /// snapshot are not visited. Returns false if any key lock wait timed out.
    pub fn invalidate_all(&self, timeout: Duration) -> bool {
        let snapshot: Vec<SharedSlots<K>> = self
            .maps
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut ok = true;
        for slots in snapshot {
            if let Some(guard) = slots.try_lock_for(timeout) {
                guard.invalidate();
            } else {
                ok = false;
            }
        }
        ok
    }

    /// Remove an abandoned ticket from its key.
    ///
    /// If a different ticket for the same owner is found it is put back.
    pub fn reclaim(&self, ticket: &Arc<PendingPut<K>>, timeout: Duration) -> Reclaim {
        let key = ticket.key();
        let Some(slots) = self.get(key) else {
            return Reclaim::Gone;
        };
        let Some(mut guard) = slots.try_lock_for(timeout) else {
            return Reclaim::Busy;
        };

        let removed = guard.remove(&ticket.owner());
        match removed {
            Some(removed) if Arc::ptr_eq(&removed, ticket) => {
                self.retire_if_empty(key, &slots, &guard);
                Reclaim::Reclaimed
            }
            Some(other) => {
                guard.put(other);
                Reclaim::Gone
            }
            None => Reclaim::Gone,
        }
    }

    /// Number of keys with tracked slots.
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    /// Returns true if no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Returns true if `key` has tracked slots.
    pub fn is_tracked(&self, key: &K) -> bool {
        self.maps.contains_key(key)
    }

    /// Number of tickets held for `key`, or `None` if its lock stayed busy.
    pub fn ticket_count(&self, key: &K, timeout: Duration) -> Option<usize> {
        let Some(slots) = self.get(key) else {
            return Some(0);
        };
        let count = slots.try_lock_for(timeout).map(|guard| guard.len());
        count
    }

    fn get(&self, key: &K) -> Option<SharedSlots<K>> {
        self.maps.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Must be called with the key lock held.
    fn retire_if_empty(&self, key: &K, slots: &SharedSlots<K>, locked: &PendingSlots<K>) {
        if locked.is_empty() {
            self.maps
                .remove_if(key, |_, current| Arc::ptr_eq(current, slots));
        }
    }
}
