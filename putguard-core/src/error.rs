//! Error types for putguard operations
//!
//! Expected races (lock timeouts on the hot path, naked puts, tickets that
//! were already invalidated) are never errors; they surface as a rejected
//! put. The types here cover configuration problems, collaborator failures
//! and invalidations that could not be confirmed.

use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Errors raised while resolving the owner of a pending put.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OwnerError {
    #[error("Could not obtain transaction: {reason}")]
    TransactionUnavailable { reason: String },
}

/// Cache store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Cache store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache store {operation} failed: {reason}")]
    OperationFailed { operation: String, reason: String },
}

/// Invalidations whose completion could not be confirmed.
///
/// The validator reports these as a `false` return; the access layer turns
/// them into errors because the cache may now hold stale data.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidationError {
    #[error("Failed to invalidate pending putFromLoad calls for key {key} within {waited:?}")]
    KeyTimedOut { key: String, waited: Duration },

    #[error("Failed to invalidate pending putFromLoad calls for region within {waited:?}")]
    RegionTimedOut { waited: Duration },
}

/// Master error type for all putguard errors.
#[derive(Debug, Clone, Error)]
pub enum PutGuardError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Owner error: {0}")]
    Owner(#[from] OwnerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalidation error: {0}")]
    Invalidation(#[from] InvalidationError),
}

/// Result type alias for putguard operations.
pub type PutGuardResult<T> = Result<T, PutGuardError>;

// =============================================================================
// TESTS
// =============================================================================
