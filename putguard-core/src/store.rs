//! Collaborator contracts for the read-through access layer.
//!
//! The validator never touches a store. Callers sandwich their own store
//! calls between acquire and release; these traits describe what the access
//! layer in `putguard-cache` needs to do that on their behalf.

use crate::PutGuardResult;

/// Key-value cache store.
///
/// Implementations should be thread-safe and support concurrent access.
pub trait CacheStore<K, V>: Send + Sync {
    /// Get a value from the cache.
    fn get(&self, key: &K) -> PutGuardResult<Option<V>>;

    /// Put a value into the cache.
    fn put(&self, key: K, value: V) -> PutGuardResult<()>;

    /// Remove a single key.
    fn remove(&self, key: &K) -> PutGuardResult<()>;

    /// Remove every entry.
    fn clear(&self) -> PutGuardResult<()>;
}

/// Reads values from the system of record on a cache miss.
pub trait RecordLoader<K, V>: Send + Sync {
    /// Load a value, or `None` if the record does not exist.
    fn load(&self, key: &K) -> PutGuardResult<Option<V>>;
}
