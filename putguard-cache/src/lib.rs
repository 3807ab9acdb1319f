//! putguard Cache - Put-From-Load Validation
//!
//! Keeps a read-through cache from storing values that were read from the
//! system of record before a concurrent write invalidated them.
//!
//! - [`pending`]: registry of in-flight registrations, one lock per key
//! - [`sweeper`]: reclaims registrations whose reader never came back
//! - [`journal`]: recent key invalidations consulted by naked puts
//! - [`validator`]: the register / acquire / release / invalidate protocol
//! - [`access`]: a store wrapper that drives the protocol for callers

pub mod access;
pub mod journal;
pub mod pending;
pub mod stats;
pub mod sweeper;
pub mod validator;

pub use access::{CacheRead, GuardedCache};
pub use journal::{RemovalJournal, RemovalRecord};
pub use pending::{Claim, ClaimedKey, PendingPut, PendingRegistry, PendingSlots, Reclaim};
pub use stats::ValidatorStats;
pub use sweeper::{TimeoutSweeper, SWEEP_SCAN_LIMIT};
pub use validator::{PutFromLoadPermit, PutFromLoadValidator};

// Re-export core types so callers need a single dependency
pub use putguard_core::{
    CacheStore, Clock, ManualClock, Owner, OwnerSource, PutGuardError, PutGuardResult,
    RecordLoader, ScopedTransactionOwners, SystemClock, ThreadOwnerSource, TransactionId,
    TransactionScope, ValidatorConfig,
};
