//! Named exclusive locks over logical resources.
//!
//! The correlation aggregator must execute the read-modify-write of a
//! [`crate::correlation::MessageGroup`] as one critical section per
//! correlation key: two concurrent partials for the same key may never both
//! observe "no match" and both create the group, nor both consume the same
//! complementary partial. A [`LockRegistry`] grants that exclusion.
//!
//! Lock scope follows the group-store backend: an in-process mutex map when
//! the store is process-local, advisory database locks or a distributed cache
//! lock when multiple consumer processes share a backend.
//!
//! # Guard semantics
//!
//! [`LockRegistry::lock`] returns a guard; the lock is released when the guard
//! drops, on **every** exit path — normal return, early `?`, or panic. Holding
//! a guard across a suspension point is expected (the group read/write happens
//! inside the critical section).

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Error type for lock operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock could not be acquired within the registry's deadline.
    /// Retriable: the caller fails the operation and lets the transport
    /// redeliver.
    #[error("Timed out acquiring lock for key '{key}'")]
    Timeout {
        /// The contended key.
        key: String,
    },

    /// The lock backend is unavailable.
    #[error("Lock backend error for key '{key}': {reason}")]
    Backend {
        /// The key being locked.
        key: String,
        /// What went wrong.
        reason: String,
    },
}

/// Result type for lock operations.
pub type Result<T> = std::result::Result<T, LockError>;

/// An acquired exclusive lock. Dropping the guard releases the lock.
///
/// Lease-based backends can force-release a lock while its holder still runs.
/// Before committing the effects of a critical section, holders call
/// [`LockGuard::verify`] to confirm ownership; a lost lock fails the
/// operation instead of letting it write without exclusion.
pub trait LockGuard: Send {
    /// Confirm this guard still holds its lock.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Backend`] if ownership was lost (lease expiry,
    /// dead session) or the ownership check itself fails.
    fn verify(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Grants mutual exclusion over a named resource.
///
/// Uses explicit `Pin<Box<dyn Future>>` returns to stay dyn-compatible
/// (`Arc<dyn LockRegistry>` is injected into the aggregator so tests can
/// substitute the in-process registry).
pub trait LockRegistry: Send + Sync {
    /// Acquire the exclusive lock for `key`, waiting up to the registry's
    /// configured deadline.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] if the deadline elapses, or
    /// [`LockError::Backend`] if the lock backend fails.
    fn lock(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn LockGuard>>> + Send + '_>>;
}
