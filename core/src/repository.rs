//! Durable order storage.
//!
//! The materializer is the only writer of order records. `persist` must be
//! idempotent on the order id: a redelivered intent that was already written
//! reports [`PersistOutcome::AlreadyExists`] instead of failing.

use crate::error::StoreError;
use crate::sale::SeckillSale;
use crate::types::{OrderId, OrderRecord, UserId, VoucherId};
use crate::BoxFuture;

/// What `persist` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// A new record was written.
    Created,
    /// A record for this order (or this user and voucher) already existed.
    AlreadyExists,
}

impl PersistOutcome {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AlreadyExists => "already_exists",
        }
    }
}

/// Relational order store and sale catalogue.
pub trait OrderRepository: Send + Sync {
    /// Whether `user_id` already owns an order for `voucher_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn exists_for(
        &self,
        user_id: UserId,
        voucher_id: VoucherId,
    ) -> BoxFuture<'_, Result<bool, StoreError>>;

    /// Write a record, idempotently.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails; nothing is written then.
    fn persist(&self, record: &OrderRecord) -> BoxFuture<'_, Result<PersistOutcome, StoreError>>;

    /// Look a record up by order id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn find(&self, order_id: OrderId) -> BoxFuture<'_, Result<Option<OrderRecord>, StoreError>>;

    /// Insert or replace a sale in the catalogue.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn save_sale(&self, sale: &SeckillSale) -> BoxFuture<'_, Result<(), StoreError>>;
}
