//! Put-from-load validation.
//!
//! [`PutFromLoadValidator`] decides whether a value read from the system of
//! record may still be written to the cache. A reader registers its intent
//! before reading, then acquires a permit before caching the result. Writers
//! invalidate the key (or the whole region) before changing the cache, which
//! tombstones every registration that began before them.
//!
//! ```ignore
//! validator.register_pending_put(key.clone())?;
//! let value = loader.load(&key)?;
//! if let Some(permit) = validator.acquire_put_from_load_lock(&key)? {
//!     store.put(key, value)?;
//!     validator.release_put_from_load_lock(permit);
//! }
//! ```
//!
//! An acquire with no prior registration is a naked put. It is only allowed
//! when neither the key nor the region was invalidated within the naked-put
//! window.

use putguard_core::{
    duration_millis, Clock, Owner, OwnerSource, PutGuardResult, SystemClock, ThreadOwnerSource,
    ValidatorConfig,
};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::journal::RemovalJournal;
use crate::pending::{Claim, ClaimedKey, PendingPut, PendingRegistry, Reclaim};
use crate::stats::{ValidatorCounters, ValidatorStats};
use crate::sweeper::TimeoutSweeper;

/// Exclusive right to write one loaded value for a key.
///
/// Holds the key lock until released or dropped; invalidations of the key
/// wait for it. Release happens on every exit path because dropping the
/// permit releases it.
#[must_use = "dropping the permit releases the put-from-load lock"]
pub struct PutFromLoadPermit<'a, K: Eq + Hash + Clone> {
    registry: &'a PendingRegistry<K>,
    claimed: Option<ClaimedKey<K>>,
}

impl<'a, K: Eq + Hash + Clone> PutFromLoadPermit<'a, K> {
    fn new(registry: &'a PendingRegistry<K>, claimed: ClaimedKey<K>) -> Self {
        Self {
            registry,
            claimed: Some(claimed),
        }
    }

    /// The key this permit covers.
    pub fn key(&self) -> Option<&K> {
        self.claimed.as_ref().map(ClaimedKey::key)
    }
}

impl<K: Eq + Hash + Clone> Drop for PutFromLoadPermit<'_, K> {
    fn drop(&mut self) {
        if let Some(claimed) = self.claimed.take() {
            self.registry.release(claimed);
        }
    }
}

impl<K: Eq + Hash + Clone + fmt::Debug> fmt::Debug for PutFromLoadPermit<'_, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PutFromLoadPermit")
            .field("key", &self.key())
            .finish()
    }
}

/// Guards a cache region against stale put-from-load writes.
pub struct PutFromLoadValidator<K, O = ThreadOwnerSource, C = SystemClock> {
    config: ValidatorConfig,
    owners: O,
    clock: C,
    registry: PendingRegistry<K>,
    sweeper: TimeoutSweeper<K>,
    journal: RemovalJournal<K>,
    /// Naked puts are refused until the clock passes this.
    region_invalidated_until: AtomicI64,
    counters: ValidatorCounters,
}

impl<K> PutFromLoadValidator<K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    /// Create a validator with default timings, thread owners and the system clock.
    pub fn with_defaults() -> Self {
        Self::from_parts(ValidatorConfig::default(), ThreadOwnerSource, SystemClock)
    }
}

impl<K, O, C> PutFromLoadValidator<K, O, C>
where
    K: Eq + Hash + Clone + fmt::Debug,
    O: OwnerSource,
    C: Clock,
{
    /// Create a validator, rejecting an inconsistent configuration.
    pub fn new(config: ValidatorConfig, owners: O, clock: C) -> PutGuardResult<Self> {
        config.validate()?;
        Ok(Self::from_parts(config, owners, clock))
    }

    fn from_parts(config: ValidatorConfig, owners: O, clock: C) -> Self {
        Self {
            sweeper: TimeoutSweeper::new(&config),
            journal: RemovalJournal::new(config.naked_put_invalidation_window),
            registry: PendingRegistry::new(),
            region_invalidated_until: AtomicI64::new(i64::MIN),
            counters: ValidatorCounters::default(),
            config,
            owners,
            clock,
        }
    }

    /// The validator's configuration.
    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Record that the caller is about to read `key` from the system of record.
    ///
    /// Best effort: if the key lock stays busy the registration is dropped.
    /// A later acquire is then rejected while the key stays tracked, and is
    /// only treated as a naked put once the key is no longer tracked. Fails
    /// only when the owner cannot be resolved.
    pub fn register_pending_put(&self, key: K) -> PutGuardResult<()> {
        let owner = self.owners.current_owner()?;
        self.register_ticket(
            key,
            owner,
            self.clock.now_millis(),
            self.config.registration_lock_timeout,
        );
        Ok(())
    }

    /// Drop the caller's registration for `key` without putting.
    ///
    /// For reads that found nothing to cache, so the key stops being tracked
    /// without waiting for the sweeper. If the key lock stays busy the
    /// registration is left for the sweeper to reclaim.
    pub fn withdraw_pending_put(&self, key: &K) -> PutGuardResult<()> {
        let owner = self.owners.current_owner()?;
        let timeout = self.config.acquire_lock_timeout;
        if !self.registry.withdraw(key, &owner, timeout) {
            debug!(key = ?key, %owner, waited = ?timeout, "withdraw lock busy; leaving registration to the sweeper");
        }
        Ok(())
    }

    /// Ask for permission to cache a value loaded for `key`.
    ///
    /// Returns a permit when the caller's registration is still valid, or
    /// when a naked put is allowed. Returns `None` when the registration was
    /// invalidated, when the key lock stayed busy, or when a naked put falls
    /// inside an invalidation window.
    pub fn acquire_put_from_load_lock(
        &self,
        key: &K,
    ) -> PutGuardResult<Option<PutFromLoadPermit<'_, K>>> {
        let now = self.clock.now_millis();
        // Sweep before any key lock is taken
        self.clean_outdated(now);

        let owner = self.owners.current_owner()?;
        Ok(self.claim(key, owner, now, true))
    }

    /// Release a permit returned by [`Self::acquire_put_from_load_lock`].
    pub fn release_put_from_load_lock(&self, permit: PutFromLoadPermit<'_, K>) {
        trace!(key = ?permit.key(), "releasing put-from-load lock");
        drop(permit);
    }

    /// Invalidate every pending put for `key`.
    ///
    /// Waits for any permit on the key to be released. Returns false if the
    /// wait timed out; the cache may then hold a stale value for the key.
    pub fn invalidate_key(&self, key: &K) -> bool {
        let timeout = self.config.invalidation_lock_timeout;
        let completed = self.registry.invalidate(key, timeout);
        if !completed {
            self.counters.record_invalidation_timeout();
            warn!(
                key = ?key,
                waited = ?timeout,
                "Failed to invalidate pending putFromLoad calls for key"
            );
        }
        self.journal
            .record_removal(key.clone(), self.clock.now_millis());
        completed
    }

    /// Invalidate every pending put in the region.
    ///
    /// Naked puts are refused for the naked-put window from now. Returns
    /// false if any key lock wait timed out.
    pub fn invalidate_region(&self) -> bool {
        let mark = self
            .clock
            .now_millis()
            .saturating_add(duration_millis(self.config.naked_put_invalidation_window));
        self.region_invalidated_until.store(mark, Ordering::SeqCst);

        let timeout = self.config.invalidation_lock_timeout;
        let completed = self.registry.invalidate_all(timeout);
        if !completed {
            self.counters.record_invalidation_timeout();
            warn!(waited = ?timeout, "Failed to invalidate pending putFromLoad calls for region");
        }
        self.journal.clear(mark);
        completed
    }

    /// Number of tickets tracked for `key`, or `None` if its lock stayed busy.
    pub fn pending_puts(&self, key: &K) -> Option<usize> {
        self.registry
            .ticket_count(key, self.config.acquire_lock_timeout)
    }

    /// Snapshot of bookkeeping sizes and outcome counters.
    pub fn stats(&self) -> ValidatorStats {
        let mut stats = ValidatorStats {
            tracked_keys: self.registry.len(),
            recent_queue_len: self.sweeper.recent_len(),
            overage_queue_len: self.sweeper.overage_len(),
            removal_queue_len: self.journal.len(),
            ..Default::default()
        };
        self.counters.fill(&mut stats);
        stats
    }

    fn register_ticket(&self, key: K, owner: Owner, now: i64, lock_timeout: Duration) -> bool {
        let ticket = Arc::new(PendingPut::new(key, owner, now));
        let registered = self.registry.register(&ticket, lock_timeout);
        if !registered {
            debug!(
                key = ?ticket.key(),
                %owner,
                waited = ?lock_timeout,
                "registration lock timed out; later acquire is rejected while the key is tracked"
            );
        }
        if let Some(abandoned) = self.sweeper.on_register(&ticket) {
            self.reclaim(abandoned, now);
        }
        registered
    }

    fn claim(
        &self,
        key: &K,
        owner: Owner,
        now: i64,
        allow_naked: bool,
    ) -> Option<PutFromLoadPermit<'_, K>> {
        match self
            .registry
            .try_claim(key, &owner, self.config.acquire_lock_timeout)
        {
            Claim::Granted(claimed) => {
                self.counters.record_granted();
                Some(PutFromLoadPermit::new(&self.registry, claimed))
            }
            Claim::Rejected => {
                self.counters.record_rejected();
                trace!(key = ?key, %owner, "registration invalidated or missing");
                None
            }
            Claim::Busy => {
                self.counters.record_rejected();
                debug!(
                    key = ?key,
                    waited = ?self.config.acquire_lock_timeout,
                    "put-from-load lock busy"
                );
                None
            }
            Claim::Untracked if allow_naked => self.claim_naked(key, owner, now),
            Claim::Untracked => {
                self.counters.record_rejected();
                debug!(key = ?key, "synthesized registration lost");
                None
            }
        }
    }

    fn claim_naked(&self, key: &K, owner: Owner, now: i64) -> Option<PutFromLoadPermit<'_, K>> {
        if let Some(reason) = self.naked_put_blocker(key, now) {
            self.counters.record_naked_rejected();
            debug!(key = ?key, reason, "naked put rejected");
            return None;
        }
        // Register on the caller's behalf so the release has a ticket to consume.
        // The key may have become tracked since the claim, so wait no longer
        // than an acquire would.
        let timeout = self.config.acquire_lock_timeout;
        if !self.register_ticket(key.clone(), owner, now, timeout) {
            self.counters.record_rejected();
            return None;
        }
        self.claim(key, owner, now, false)
    }

    fn naked_put_blocker(&self, key: &K, now: i64) -> Option<&'static str> {
        if now <= self.region_invalidated_until.load(Ordering::SeqCst) {
            Some("region recently invalidated")
        } else if !self.journal.is_naked_put_allowed(key, now) {
            Some("key recently invalidated")
        } else {
            None
        }
    }

    fn clean_outdated(&self, now: i64) {
        if let Some(abandoned) = self.sweeper.sweep(now) {
            self.reclaim(abandoned, now);
        }
    }

    fn reclaim(&self, ticket: Arc<PendingPut<K>>, now: i64) {
        match self
            .registry
            .reclaim(&ticket, self.config.acquire_lock_timeout)
        {
            Reclaim::Reclaimed => {
                self.counters.record_reclaimed();
                debug!(
                    key = ?ticket.key(),
                    owner = %ticket.owner(),
                    age_ms = now - ticket.timestamp(),
                    "reclaimed abandoned registration"
                );
            }
            Reclaim::Busy => {
                debug!(key = ?ticket.key(), "key busy; requeueing abandoned registration");
                self.sweeper.requeue(&ticket, self.clock.now_millis());
            }
            Reclaim::Gone => {}
        }
    }
}

impl<K, O: fmt::Debug, C: fmt::Debug> fmt::Debug for PutFromLoadValidator<K, O, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PutFromLoadValidator")
            .field("config", &self.config)
            .field("owners", &self.owners)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
