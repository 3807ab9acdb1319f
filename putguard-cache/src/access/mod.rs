//! Read-through access layer guarded by put-from-load validation.
//!
//! [`GuardedCache`] drives the register, load, acquire, put, release
//! sequence on behalf of callers, and turns unconfirmed invalidations into
//! errors. Reads return [`CacheRead<V>`], which records whether the value
//! came from the cache and whether a loaded value was actually cached.
//!
//! # Example
//!
//! ```ignore
//! let cache = GuardedCache::new(store, validator);
//!
//! // Miss: loads from the system of record, caches unless a writer raced us
//! let read = cache.get_or_load(&key, &loader)?;
//!
//! // Writers invalidate before touching the store
//! cache.update(key, value)?;
//! ```

pub mod guarded;
pub mod read;

pub use guarded::GuardedCache;
pub use read::CacheRead;
