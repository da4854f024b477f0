//! Leased mutual exclusion from an external coordination service.
//!
//! Locks are acquired with non-blocking `try_acquire` semantics and a bounded
//! lease, so a crashed holder blocks nobody for longer than the lease. Release
//! only succeeds for the holder's own token.

use std::time::Duration;

use thiserror::Error;

use crate::types::UserId;
use crate::BoxFuture;

/// Errors from the lock service itself (not contention).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Failed to reach the lock service.
    #[error("Lock service unavailable: {0}")]
    Unavailable(String),

    /// A lock command failed.
    #[error("Lock command on '{name}' failed: {reason}")]
    CommandFailed {
        /// Lock name
        name: String,
        /// The reason for failure
        reason: String,
    },
}

/// A granted lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    /// Lock name, e.g. `order:42`.
    pub name: String,
    /// Holder token; release is a no-op for any other token.
    pub token: String,
    /// Lease length granted.
    pub lease: Duration,
}

/// Lock name serializing order creation for one user.
#[must_use]
pub fn order_lock_name(user_id: UserId) -> String {
    format!("order:{user_id}")
}

/// Distributed, leased lock.
pub trait DistributedLock: Send + Sync {
    /// Try once to take `name` for `lease`.
    ///
    /// Returns `Ok(None)` immediately if someone else holds it.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] if the lock service failed.
    fn try_acquire(
        &self,
        name: &str,
        lease: Duration,
    ) -> BoxFuture<'_, Result<Option<LockLease>, LockError>>;

    /// Release a lease if it is still ours. Returns whether it was released.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] if the lock service failed.
    fn release(&self, lease: &LockLease) -> BoxFuture<'_, Result<bool, LockError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_lock_name() {
        assert_eq!(order_lock_name(UserId(1010)), "order:1010");
    }
}
