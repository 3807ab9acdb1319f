//! putguard Core - Shared Types
//!
//! Owner identity, clocks, configuration, errors and collaborator contracts.
//! This crate contains no concurrency logic; the put-from-load controller
//! lives in `putguard-cache`.

pub mod clock;
pub mod config;
pub mod error;
pub mod owner;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    duration_millis, ValidatorConfig, ACQUIRE_LOCK_TIMEOUT, INVALIDATION_LOCK_TIMEOUT,
    MAX_PENDING_PUT_DELAY, NAKED_PUT_INVALIDATION_WINDOW, PENDING_PUT_OVERAGE_PERIOD,
    PENDING_PUT_RECENT_PERIOD, REGISTRATION_LOCK_TIMEOUT,
};
pub use error::{
    ConfigError, InvalidationError, OwnerError, PutGuardError, PutGuardResult, StoreError,
};
pub use owner::{
    Owner, OwnerSource, ScopedTransactionOwners, ThreadOwnerSource, TransactionId,
    TransactionScope,
};
pub use store::{CacheStore, RecordLoader};
