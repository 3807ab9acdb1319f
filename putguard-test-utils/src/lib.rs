//! putguard Test Utilities
//!
//! Shared test infrastructure for the putguard workspace:
//! - In-memory store and loader implementing the collaborator contracts
//! - An owner source tests can switch between owners
//! - Proptest generators for keys, owners and configurations
//! - Fixtures and assertions for common scenarios
//! - Tracing setup for test output

pub use putguard_core::{
    CacheStore, Clock, ManualClock, Owner, OwnerSource, PutGuardError, PutGuardResult,
    RecordLoader, StoreError, TransactionId, ValidatorConfig,
};

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};

// ============================================================================
// MOCK COLLABORATORS
// ============================================================================

/// In-memory cache store.
#[derive(Debug)]
pub struct MemoryStore<K, V> {
    entries: RwLock<HashMap<K, V>>,
    fail_next_put: Mutex<Option<StoreError>>,
    puts: AtomicUsize,
}

impl<K: Eq + Hash, V> Default for MemoryStore<K, V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            fail_next_put: Mutex::new(None),
            puts: AtomicUsize::new(0),
        }
    }
}

impl<K: Eq + Hash, V> MemoryStore<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `put` fail with `error`.
    pub fn fail_next_put(&self, error: StoreError) {
        *self.fail_next_put.lock() = Some(error);
    }

    /// Number of successful puts.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<K, V> CacheStore<K, V> for MemoryStore<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> PutGuardResult<Option<V>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: K, value: V) -> PutGuardResult<()> {
        if let Some(error) = self.fail_next_put.lock().take() {
            return Err(error.into());
        }
        self.entries.write().insert(key, value);
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self, key: &K) -> PutGuardResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn clear(&self) -> PutGuardResult<()> {
        self.entries.write().clear();
        Ok(())
    }
}

/// System of record backed by a fixed map, counting loads.
#[derive(Debug)]
pub struct MapLoader<K, V> {
    records: HashMap<K, V>,
    fail_next_load: Mutex<Option<StoreError>>,
    loads: AtomicUsize,
}

impl<K: Eq + Hash, V> MapLoader<K, V> {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            records: pairs.into_iter().collect(),
            fail_next_load: Mutex::new(None),
            loads: AtomicUsize::new(0),
        }
    }

    /// Make the next `load` fail with `error`.
    pub fn fail_next_load(&self, error: StoreError) {
        *self.fail_next_load.lock() = Some(error);
    }

    /// Number of `load` calls so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl<K, V> RecordLoader<K, V> for MapLoader<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    fn load(&self, key: &K) -> PutGuardResult<Option<V>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.fail_next_load.lock().take() {
            return Err(error.into());
        }
        Ok(self.records.get(key).cloned())
    }
}

/// Owner source reporting whichever owner was last set.
///
/// Lets a single test thread act as several concurrent readers.
#[derive(Debug)]
pub struct SwitchableOwner {
    current: RwLock<Owner>,
}

impl SwitchableOwner {
    pub fn new(owner: Owner) -> Self {
        Self {
            current: RwLock::new(owner),
        }
    }

    /// Start as a fresh transaction.
    pub fn transaction() -> Self {
        Self::new(Owner::Transaction(TransactionId::new()))
    }

    /// Switch to `owner`, returning the previous one.
    pub fn set(&self, owner: Owner) -> Owner {
        std::mem::replace(&mut *self.current.write(), owner)
    }

    /// Switch to a fresh transaction and return it.
    pub fn switch_to_new(&self) -> Owner {
        let owner = Owner::Transaction(TransactionId::new());
        self.set(owner);
        owner
    }

    pub fn get(&self) -> Owner {
        *self.current.read()
    }
}

impl OwnerSource for SwitchableOwner {
    fn current_owner(&self) -> PutGuardResult<Owner> {
        Ok(self.get())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for putguard types.

    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;
    use uuid::Uuid;

    /// Generate a key from a small alphabet so operations collide.
    pub fn arb_key() -> impl Strategy<Value = String> {
        prop::sample::select(vec!["a", "b", "c"]).prop_map(str::to_string)
    }

    /// Generate a transaction owner.
    pub fn arb_owner() -> impl Strategy<Value = Owner> {
        any::<[u8; 16]>()
            .prop_map(|bytes| Owner::Transaction(TransactionId::from_uuid(Uuid::from_bytes(bytes))))
    }

    /// Generate a configuration that passes validation.
    pub fn arb_config() -> impl Strategy<Value = ValidatorConfig> {
        (1u64..5_000, 1u64..5_000, 1u64..5_000, 1u64..60_000).prop_map(
            |(recent, extra_overage, extra_max, window)| {
                let overage = recent + extra_overage;
                ValidatorConfig::default()
                    .with_pending_put_recent_period(Duration::from_millis(recent))
                    .with_pending_put_overage_period(Duration::from_millis(overage))
                    .with_max_pending_put_delay(Duration::from_millis(overage + extra_max))
                    .with_naked_put_invalidation_window(Duration::from_millis(window))
            },
        )
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built configurations and clocks.

    use super::*;
    use std::time::Duration;

    /// Starting instant for manual clocks, far from zero.
    pub const START_MILLIS: i64 = 1_700_000_000_000;

    /// A manual clock at [`START_MILLIS`].
    pub fn manual_clock() -> ManualClock {
        ManualClock::starting_at(START_MILLIS)
    }

    /// Default timings with lock waits short enough for thread tests.
    pub fn fast_config() -> ValidatorConfig {
        ValidatorConfig::default()
            .with_acquire_lock_timeout(Duration::from_millis(50))
            .with_registration_lock_timeout(Duration::from_millis(200))
            .with_invalidation_lock_timeout(Duration::from_millis(200))
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for putguard results.

    use super::*;

    /// Assert that a result is Ok.
    pub fn assert_ok<T: std::fmt::Debug>(result: &PutGuardResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a result is an invalidation timeout.
    pub fn assert_invalidation_timeout<T: std::fmt::Debug>(result: &PutGuardResult<T>) {
        assert!(
            matches!(result, Err(PutGuardError::Invalidation(_))),
            "Expected Invalidation error, got: {:?}",
            result
        );
    }

    /// Assert that a result is a configuration error.
    pub fn assert_config_error<T: std::fmt::Debug>(result: &PutGuardResult<T>) {
        assert!(
            matches!(result, Err(PutGuardError::Config(_))),
            "Expected Config error, got: {:?}",
            result
        );
    }
}

// ============================================================================
// TRACING
// ============================================================================

/// Install a test-writer subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_memory_store_fail_next_put() {
        let store = MemoryStore::<u32, u32>::new();
        store.fail_next_put(StoreError::Unavailable {
            reason: "offline".to_string(),
        });
        assert!(store.put(1, 1).is_err());
        assert!(store.put(1, 2).is_ok());
        assert_eq!(store.get(&1).unwrap(), Some(2));
        assert_eq!(store.put_count(), 1);
    }

    #[test]
    fn test_switchable_owner() {
        let owners = SwitchableOwner::transaction();
        let first = owners.get();
        let second = owners.switch_to_new();
        assert_ne!(first, second);
        assert_eq!(owners.current_owner().unwrap(), second);
        assert_eq!(owners.set(first), second);
    }

    proptest! {
        #[test]
        fn prop_generated_configs_validate(config in generators::arb_config()) {
            prop_assert!(config.validate().is_ok());
        }
    }
}
