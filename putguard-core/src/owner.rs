//! Owner identity for pending puts
//!
//! A pending put is claimed by its owner: the active transaction when one is
//! bound to the calling thread, otherwise the thread itself.

use crate::PutGuardResult;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use uuid::Uuid;

/// Transaction identifier using UUIDv7 for timestamp-sortable IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Generate a new transaction id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity distinguishing concurrent claimants for the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    /// A thread with no active transaction
    Thread(ThreadId),
    /// A transaction, possibly spanning several threads
    Transaction(TransactionId),
}

impl Owner {
    /// The calling thread as an owner.
    pub fn current_thread() -> Self {
        Owner::Thread(thread::current().id())
    }

    /// Returns true if this owner is a transaction.
    pub fn is_transaction(&self) -> bool {
        matches!(self, Owner::Transaction(_))
    }
}

impl From<TransactionId> for Owner {
    fn from(id: TransactionId) -> Self {
        Owner::Transaction(id)
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Thread(id) => write!(f, "thread {:?}", id),
            Owner::Transaction(id) => write!(f, "transaction {}", id),
        }
    }
}

/// Resolves the owner of the current logical read-then-put sequence.
///
/// The returned owner must be stable for the duration of one sequence and
/// distinct across genuinely concurrent callers. Failing to resolve the owner
/// is fatal to the calling operation.
pub trait OwnerSource: Send + Sync {
    /// Get the owner for the calling context.
    fn current_owner(&self) -> PutGuardResult<Owner>;
}

impl<S: OwnerSource + ?Sized> OwnerSource for Arc<S> {
    fn current_owner(&self) -> PutGuardResult<Owner> {
        (**self).current_owner()
    }
}

/// Owner source that always reports the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadOwnerSource;

impl OwnerSource for ThreadOwnerSource {
    fn current_owner(&self) -> PutGuardResult<Owner> {
        Ok(Owner::current_thread())
    }
}

// ============================================================================
// TRANSACTION SCOPING
// ============================================================================

thread_local! {
    static CURRENT_TRANSACTION: Cell<Option<TransactionId>> = const { Cell::new(None) };
}

/// Binds a transaction to the current thread until dropped.
///
/// Scopes nest: dropping a scope restores whatever binding was active when
/// it was created.
#[derive(Debug)]
pub struct TransactionScope {
    id: TransactionId,
    previous: Option<TransactionId>,
    // Bindings are thread-local, so the scope must stay on its thread.
    _not_send: std::marker::PhantomData<*const ()>,
}

impl TransactionScope {
    /// Begin a fresh transaction on the current thread.
    pub fn begin() -> Self {
        Self::bind(TransactionId::new())
    }

    /// Bind an existing transaction to the current thread.
    pub fn bind(id: TransactionId) -> Self {
        let previous = CURRENT_TRANSACTION.with(|current| current.replace(Some(id)));
        Self {
            id,
            previous,
            _not_send: std::marker::PhantomData,
        }
    }

    /// The transaction bound by this scope.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// The transaction bound to the calling thread, if any.
    pub fn current() -> Option<TransactionId> {
        CURRENT_TRANSACTION.with(|current| current.get())
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        CURRENT_TRANSACTION.with(|current| current.set(self.previous));
    }
}

/// Owner source that prefers the transaction bound by [`TransactionScope`]
/// and falls back to the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopedTransactionOwners;

impl OwnerSource for ScopedTransactionOwners {
    fn current_owner(&self) -> PutGuardResult<Owner> {
        Ok(TransactionScope::current()
            .map(Owner::Transaction)
            .unwrap_or_else(Owner::current_thread))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OwnerError, PutGuardError};

    #[test]
    fn test_thread_owner_is_stable_per_thread() {
        let source = ThreadOwnerSource;
        let a = source.current_owner().unwrap();
        let b = source.current_owner().unwrap();
        assert_eq!(a, b);

        let other = thread::spawn(move || ThreadOwnerSource.current_owner().unwrap())
            .join()
            .unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn test_scoped_transaction_owner() {
        let source = ScopedTransactionOwners;
        let thread_owner = Owner::current_thread();
        assert_eq!(source.current_owner().unwrap(), thread_owner);

        {
            let scope = TransactionScope::begin();
            let owner = source.current_owner().unwrap();
            assert_eq!(owner, Owner::Transaction(scope.id()));
            assert!(owner.is_transaction());
        }

        assert_eq!(source.current_owner().unwrap(), thread_owner);
    }

    #[test]
    fn test_transaction_scopes_nest() {
        let outer = TransactionScope::begin();
        {
            let inner = TransactionScope::begin();
            assert_eq!(TransactionScope::current(), Some(inner.id()));
        }
        assert_eq!(TransactionScope::current(), Some(outer.id()));
        drop(outer);
        assert_eq!(TransactionScope::current(), None);
    }

    #[test]
    fn test_transaction_bound_on_other_thread_is_invisible() {
        let _scope = TransactionScope::begin();
        let seen = thread::spawn(TransactionScope::current).join().unwrap();
        assert_eq!(seen, None);
    }

    struct OfflineManager;

    impl OwnerSource for OfflineManager {
        fn current_owner(&self) -> PutGuardResult<Owner> {
            Err(OwnerError::TransactionUnavailable {
                reason: "no manager".to_string(),
            }
            .into())
        }
    }

    #[test]
    fn test_owner_source_errors_propagate_through_arc() {
        let failing = Arc::new(OfflineManager);
        assert!(matches!(
            failing.current_owner(),
            Err(PutGuardError::Owner(OwnerError::TransactionUnavailable { .. }))
        ));
    }

    #[test]
    fn test_owner_display() {
        let id = TransactionId::from_uuid(Uuid::nil());
        assert_eq!(
            Owner::from(id).to_string(),
            "transaction 00000000-0000-0000-0000-000000000000"
        );
        assert!(Owner::current_thread().to_string().starts_with("thread"));
    }
}
