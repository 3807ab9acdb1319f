//! Result of a guarded cache read.

/// Value returned by a guarded read, with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRead<T> {
    value: T,
    was_cache_hit: bool,
    was_cached: bool,
}

impl<T> CacheRead<T> {
    /// A value found in the cache.
    pub fn from_cache(value: T) -> Self {
        Self {
            value,
            was_cache_hit: true,
            was_cached: true,
        }
    }

    /// A value loaded from the system of record.
    ///
    /// `was_cached` is false when the put-from-load was refused or skipped.
    pub fn from_load(value: T, was_cached: bool) -> Self {
        Self {
            value,
            was_cache_hit: false,
            was_cached,
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Get a reference to the underlying value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Check if this was a cache hit.
    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    /// Check if this was a cache miss (loaded from the system of record).
    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit
    }

    /// Whether the value is now held by the cache.
    pub fn was_cached(&self) -> bool {
        self.was_cached
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            was_cache_hit: self.was_cache_hit,
            was_cached: self.was_cached,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_read_from_cache() {
        let read = CacheRead::from_cache(42);
        assert!(read.was_cache_hit());
        assert!(!read.was_cache_miss());
        assert!(read.was_cached());
        assert_eq!(*read.value(), 42);
    }

    #[test]
    fn test_cache_read_from_load() {
        let refused = CacheRead::from_load("v", false);
        assert!(refused.was_cache_miss());
        assert!(!refused.was_cached());
        assert_eq!(refused.into_value(), "v");
    }

    #[test]
    fn test_cache_read_map() {
        let read = CacheRead::from_load(21, true).map(|v| v * 2);
        assert_eq!(*read.as_ref(), 42);
        assert!(read.was_cached());
        assert!(read.was_cache_miss());
    }
}
