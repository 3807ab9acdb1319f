//! Read-through cache wrapper that only caches validated loads.

use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use putguard_core::{
    CacheStore, Clock, InvalidationError, OwnerSource, PutGuardResult, RecordLoader, SystemClock,
    ThreadOwnerSource,
};
use tracing::trace;

use super::read::CacheRead;
use crate::validator::PutFromLoadValidator;

/// Cache store guarded by a [`PutFromLoadValidator`].
///
/// # Type Parameters
///
/// - `S`: the cache store holding values
/// - `O`: resolves the owner of each read-then-put sequence
/// - `C`: clock driving invalidation windows
pub struct GuardedCache<K, V, S, O = ThreadOwnerSource, C = SystemClock> {
    store: Arc<S>,
    validator: Arc<PutFromLoadValidator<K, O, C>>,
    _value: PhantomData<fn() -> V>,
}

impl<K, V, S, O, C> GuardedCache<K, V, S, O, C>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Clone,
    S: CacheStore<K, V>,
    O: OwnerSource,
    C: Clock,
{
    /// Create a guarded cache over `store`.
    pub fn new(store: Arc<S>, validator: Arc<PutFromLoadValidator<K, O, C>>) -> Self {
        Self {
            store,
            validator,
            _value: PhantomData,
        }
    }

    /// Get a reference to the cache store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get a reference to the validator.
    pub fn validator(&self) -> &PutFromLoadValidator<K, O, C> {
        &self.validator
    }

    /// Get a value from the cache without loading.
    pub fn get(&self, key: &K) -> PutGuardResult<Option<V>> {
        self.store.get(key)
    }

    /// Get a value, loading it from the system of record on a miss.
    ///
    /// The loaded value is cached only if no invalidation of the key or the
    /// region overlapped the load. Returns `Ok(None)` if the record does not
    /// exist. When the load finds nothing or fails, the registration is
    /// withdrawn so the key is not left tracked.
    pub fn get_or_load<L>(&self, key: &K, loader: &L) -> PutGuardResult<Option<CacheRead<V>>>
    where
        L: RecordLoader<K, V>,
    {
        if let Some(value) = self.store.get(key)? {
            return Ok(Some(CacheRead::from_cache(value)));
        }

        self.validator.register_pending_put(key.clone())?;
        let loaded = loader.load(key);
        if !matches!(loaded, Ok(Some(_))) {
            self.validator.withdraw_pending_put(key)?;
        }
        let Some(value) = loaded? else {
            return Ok(None);
        };

        let cached = self.put_from_load(key.clone(), value.clone(), false)?;
        Ok(Some(CacheRead::from_load(value, cached)))
    }

    /// Cache a value loaded from the system of record.
    ///
    /// With `minimal_put`, skips the write when the store already holds the
    /// key. Returns whether the value was written.
    pub fn put_from_load(&self, key: K, value: V, minimal_put: bool) -> PutGuardResult<bool> {
        if minimal_put && self.store.get(&key)?.is_some() {
            trace!(key = ?key, "minimal put skipped; key already cached");
            return Ok(false);
        }

        let Some(permit) = self.validator.acquire_put_from_load_lock(&key)? else {
            trace!(key = ?key, "put-from-load refused");
            return Ok(false);
        };
        let written = self.store.put(key, value);
        self.validator.release_put_from_load_lock(permit);
        written.map(|()| true)
    }

    /// Write a value after invalidating in-flight loads of the key.
    pub fn update(&self, key: K, value: V) -> PutGuardResult<()> {
        self.invalidate(&key)?;
        self.store.put(key, value)
    }

    /// Remove a key after invalidating in-flight loads of it.
    pub fn remove(&self, key: &K) -> PutGuardResult<()> {
        self.invalidate(key)?;
        self.store.remove(key)
    }

    /// Clear the store after invalidating every in-flight load.
    pub fn remove_all(&self) -> PutGuardResult<()> {
        if !self.validator.invalidate_region() {
            return Err(InvalidationError::RegionTimedOut {
                waited: self.validator.config().invalidation_lock_timeout,
            }
            .into());
        }
        self.store.clear()
    }

    fn invalidate(&self, key: &K) -> PutGuardResult<()> {
        if self.validator.invalidate_key(key) {
            Ok(())
        } else {
            Err(InvalidationError::KeyTimedOut {
                key: format!("{:?}", key),
                waited: self.validator.config().invalidation_lock_timeout,
            }
            .into())
        }
    }
}

impl<K, V, S, O, C> Clone for GuardedCache<K, V, S, O, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            validator: Arc::clone(&self.validator),
            _value: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use putguard_core::{ManualClock, PutGuardError, StoreError, ValidatorConfig};
    use putguard_test_utils::{MapLoader, MemoryStore};
    use std::thread;
    use std::time::Duration;

    type TestCache = GuardedCache<String, String, MemoryStore<String, String>, ThreadOwnerSource, ManualClock>;

    fn cache_with(config: ValidatorConfig) -> (TestCache, ManualClock) {
        let clock = ManualClock::starting_at(1_000_000);
        let validator =
            PutFromLoadValidator::new(config, ThreadOwnerSource, clock.clone()).unwrap();
        (
            GuardedCache::new(Arc::new(MemoryStore::new()), Arc::new(validator)),
            clock,
        )
    }

    fn cache() -> (TestCache, ManualClock) {
        cache_with(ValidatorConfig::default())
    }

    fn loader() -> MapLoader<String, String> {
        MapLoader::from_pairs([("a".to_string(), "alpha".to_string())])
    }

    #[test]
    fn test_get_or_load_caches_on_miss() {
        let (cache, _) = cache();
        let loader = loader();
        let key = "a".to_string();

        let first = cache.get_or_load(&key, &loader).unwrap().unwrap();
        assert!(first.was_cache_miss());
        assert!(first.was_cached());
        assert_eq!(first.value(), "alpha");

        let second = cache.get_or_load(&key, &loader).unwrap().unwrap();
        assert!(second.was_cache_hit());
        assert_eq!(loader.load_count(), 1);
        assert_eq!(cache.validator().stats().tracked_keys, 0);
    }

    #[test]
    fn test_get_or_load_missing_record() {
        let (cache, _) = cache();
        assert!(cache
            .get_or_load(&"zzz".to_string(), &loader())
            .unwrap()
            .is_none());
        assert_eq!(cache.get(&"zzz".to_string()).unwrap(), None);
        assert_eq!(cache.validator().stats().tracked_keys, 0);
    }

    #[test]
    fn test_get_or_load_failure_withdraws_registration() {
        let (cache, _) = cache();
        let loader = loader();
        let key = "a".to_string();
        loader.fail_next_load(StoreError::OperationFailed {
            operation: "load".to_string(),
            reason: "connection reset".to_string(),
        });

        let result = cache.get_or_load(&key, &loader);
        assert!(matches!(result, Err(PutGuardError::Store(_))));
        assert_eq!(cache.validator().stats().tracked_keys, 0);

        // Another reader's naked put is not refused by the abandoned read
        thread::scope(|s| {
            let other = s.spawn(|| cache.put_from_load(key.clone(), "alpha".to_string(), false));
            assert!(other.join().unwrap().unwrap());
        });
    }

    #[test]
    fn test_get_or_load_missing_record_allows_other_puts() {
        let (cache, _) = cache();
        let key = "zzz".to_string();
        assert!(cache.get_or_load(&key, &loader()).unwrap().is_none());

        thread::scope(|s| {
            let other = s.spawn(|| cache.put_from_load(key.clone(), "late".to_string(), false));
            assert!(other.join().unwrap().unwrap());
        });
        assert_eq!(cache.get(&key).unwrap(), Some("late".to_string()));
    }

    #[test]
    fn test_put_from_load_refused_after_update() {
        let (cache, _) = cache();
        let key = "a".to_string();
        cache.update(key.clone(), "fresh".to_string()).unwrap();

        // A naked put of a stale read inside the window must not overwrite
        assert!(!cache
            .put_from_load(key.clone(), "stale".to_string(), false)
            .unwrap());
        assert_eq!(cache.get(&key).unwrap(), Some("fresh".to_string()));
    }

    #[test]
    fn test_minimal_put_skips_cached_key() {
        let (cache, _) = cache();
        let key = "a".to_string();
        assert!(cache.put_from_load(key.clone(), "one".to_string(), true).unwrap());
        assert!(!cache.put_from_load(key.clone(), "two".to_string(), true).unwrap());
        assert_eq!(cache.get(&key).unwrap(), Some("one".to_string()));
    }

    #[test]
    fn test_remove_and_remove_all() {
        let (cache, clock) = cache();
        let key = "a".to_string();
        cache.put_from_load(key.clone(), "one".to_string(), false).unwrap();
        cache.remove(&key).unwrap();
        assert_eq!(cache.get(&key).unwrap(), None);

        cache.remove_all().unwrap();
        assert!(!cache
            .put_from_load("b".to_string(), "two".to_string(), false)
            .unwrap());
        clock.advance(Duration::from_secs(21));
        assert!(cache
            .put_from_load("b".to_string(), "two".to_string(), false)
            .unwrap());
    }

    #[test]
    fn test_store_error_releases_permit() {
        let (cache, _) = cache();
        let key = "a".to_string();
        cache.store().fail_next_put(StoreError::Unavailable {
            reason: "disk full".to_string(),
        });

        let result = cache.put_from_load(key.clone(), "one".to_string(), false);
        assert!(matches!(result, Err(PutGuardError::Store(_))));
        // The key lock was released, so invalidation completes at once
        assert!(cache.validator().invalidate_key(&key));
        assert_eq!(cache.validator().stats().tracked_keys, 0);
    }

    #[test]
    fn test_update_times_out_while_put_in_flight() {
        let config = ValidatorConfig::default()
            .with_invalidation_lock_timeout(Duration::from_millis(30));
        let (cache, _) = cache_with(config);
        let key = "a".to_string();

        cache.validator().register_pending_put(key.clone()).unwrap();
        let permit = cache
            .validator()
            .acquire_put_from_load_lock(&key)
            .unwrap()
            .expect("registered put granted");

        thread::scope(|s| {
            let writer = s.spawn(|| cache.update("a".to_string(), "new".to_string()));
            let result = writer.join().unwrap();
            assert!(matches!(
                result,
                Err(PutGuardError::Invalidation(InvalidationError::KeyTimedOut { .. }))
            ));
        });
        cache.validator().release_put_from_load_lock(permit);
    }
}
