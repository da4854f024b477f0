//! The admission gate: one atomic step deciding who gets a unit of stock.
//!
//! # Contract
//!
//! `attempt_purchase(voucher, user, order)` runs as a single indivisible unit
//! on the store that owns the Voucher Stock Record and the Purchase Eligibility
//! Markers:
//!
//! 1. marker for `(voucher, user)` exists → [`AdmissionOutcome::Duplicate`]
//! 2. stock `<= 0` (or no stock record) → [`AdmissionOutcome::OutOfStock`]
//! 3. otherwise decrement stock, record the marker → [`AdmissionOutcome::Granted`]
//!
//! No read/write interleaving across callers is possible, so `N` units can
//! never produce more than `N` grants. Implementations must *not* emulate this
//! with a client-side read followed by a write.
//!
//! A failure to execute the step is an `Err`, never a rejection outcome.

use crate::error::SeckillError;
use crate::types::{AdmissionOutcome, OrderId, UserId, VoucherId};
use crate::BoxFuture;

/// Atomic check-and-decrement over stock and eligibility markers.
pub trait AdmissionGate: Send + Sync {
    /// Try to admit `user_id` for one unit of `voucher_id`.
    ///
    /// `order_id` is generated by the caller beforehand and recorded alongside
    /// the marker; the gate never generates ids.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Admission`] if the atomic step could not run.
    fn attempt_purchase(
        &self,
        voucher_id: VoucherId,
        user_id: UserId,
        order_id: OrderId,
    ) -> BoxFuture<'_, Result<AdmissionOutcome, SeckillError>>;

    /// Undo a grant whose intent could not be enqueued.
    ///
    /// Atomically removes the marker and restores one unit, but only if the
    /// marker still carries `order_id`. Returns whether anything was undone.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Admission`] if the atomic step could not run.
    fn release(
        &self,
        voucher_id: VoucherId,
        user_id: UserId,
        order_id: OrderId,
    ) -> BoxFuture<'_, Result<bool, SeckillError>>;
}
