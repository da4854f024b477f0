//! The purchase path: decide synchronously, persist later.
//!
//! ```text
//! attempt_purchase(voucher, user)
//!   ├─ sale window open?          no  → Rejected(SaleNotFound | SaleNotStarted | SaleEnded)
//!   ├─ order id ← id generator
//!   ├─ admission gate (atomic)    OUT_OF_STOCK | DUPLICATE → Rejected
//!   ├─ enqueue intent (retried)   refused → release grant, Err (transient)
//!   │                             unknown → keep grant, Err (transient)
//!   └─ Accepted(order id)
//! ```
//!
//! The request never waits for the order record; that is the materializer's job.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use seckill_core::admission::AdmissionGate;
use seckill_core::environment::Clock;
use seckill_core::id::IdGenerator;
use seckill_core::queue::OrderQueue;
use seckill_core::repository::OrderRepository;
use seckill_core::sale::{SaleRegistry, SaleStatus, SeckillSale};
use seckill_core::{
    AdmissionOutcome, OrderId, OrderIntent, OrderRecord, SeckillError, UserId, VoucherId,
};

use crate::metrics::SeckillMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};

/// Id scope used for order ids unless configured otherwise.
pub const DEFAULT_ID_SCOPE: &str = "order";

/// A business-rule refusal. Not an error: nothing changed and retrying won't help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// No units left.
    OutOfStock,
    /// This user already holds a unit of this voucher.
    Duplicate,
    /// The voucher is not on sale.
    SaleNotFound,
    /// The sale has not opened yet.
    SaleNotStarted,
    /// The sale is over.
    SaleEnded,
}

impl Rejection {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::OutOfStock => "OUT_OF_STOCK",
            Self::Duplicate => "DUPLICATE",
            Self::SaleNotFound => "SALE_NOT_FOUND",
            Self::SaleNotStarted => "SALE_NOT_STARTED",
            Self::SaleEnded => "SALE_ENDED",
        }
    }

    /// Message shown to the buyer.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::OutOfStock => "Sold out",
            Self::Duplicate => "Each user may buy this voucher only once",
            Self::SaleNotFound => "This voucher is not on sale",
            Self::SaleNotStarted => "The sale has not started yet",
            Self::SaleEnded => "The sale has ended",
        }
    }

    const fn metric_label(self) -> &'static str {
        match self {
            Self::OutOfStock => "out_of_stock",
            Self::Duplicate => "duplicate",
            Self::SaleNotFound => "sale_not_found",
            Self::SaleNotStarted => "sale_not_started",
            Self::SaleEnded => "sale_ended",
        }
    }
}

/// Result of a purchase attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseDecision {
    /// Admitted; the intent is queued under this order id.
    Accepted(OrderId),
    /// Refused by a business rule.
    Rejected(Rejection),
}

/// Collaborators of [`SeckillService`].
#[derive(Clone)]
pub struct PurchaseDependencies {
    /// Atomic admission primitive.
    pub gate: Arc<dyn AdmissionGate>,
    /// Intake queue.
    pub queue: Arc<dyn OrderQueue>,
    /// Hot-path sale state.
    pub sales: Arc<dyn SaleRegistry>,
    /// Durable orders and sale catalogue.
    pub orders: Arc<dyn OrderRepository>,
    /// Order id source.
    pub ids: IdGenerator,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

/// Purchase orchestration.
#[derive(Clone)]
pub struct SeckillService {
    deps: PurchaseDependencies,
    id_scope: String,
    enqueue_retry: RetryPolicy,
}

impl SeckillService {
    /// Create a service with the default id scope and enqueue retry policy.
    #[must_use]
    pub fn new(deps: PurchaseDependencies) -> Self {
        Self {
            deps,
            id_scope: DEFAULT_ID_SCOPE.to_string(),
            enqueue_retry: RetryPolicy::builder().max_retries(2).build(),
        }
    }

    /// Use `scope` for order ids.
    #[must_use]
    pub fn with_id_scope(mut self, scope: impl Into<String>) -> Self {
        self.id_scope = scope.into();
        self
    }

    /// Retry policy for appending admitted intents.
    #[must_use]
    pub fn with_enqueue_retry(mut self, policy: RetryPolicy) -> Self {
        self.enqueue_retry = policy;
        self
    }

    /// Try to buy one unit of `voucher_id` for `user_id`.
    ///
    /// # Errors
    ///
    /// Any `Err` is an infrastructure failure and is transient: sale lookup,
    /// id generation, the admission script, or enqueueing. A refused enqueue
    /// releases the grant again; one with an unknown outcome keeps it, so a
    /// retry by the same user may answer `Duplicate`.
    pub async fn attempt_purchase(
        &self,
        voucher_id: VoucherId,
        user_id: UserId,
    ) -> Result<PurchaseDecision, SeckillError> {
        let started = Instant::now();
        let decision = self.decide(voucher_id, user_id).await;

        let label = match &decision {
            Ok(PurchaseDecision::Accepted(_)) => "accepted",
            Ok(PurchaseDecision::Rejected(rejection)) => rejection.metric_label(),
            Err(_) => "error",
        };
        SeckillMetrics::record_admission(label, started.elapsed());

        decision
    }

    async fn decide(
        &self,
        voucher_id: VoucherId,
        user_id: UserId,
    ) -> Result<PurchaseDecision, SeckillError> {
        let Some(window) = self.deps.sales.window(voucher_id).await? else {
            return Ok(PurchaseDecision::Rejected(Rejection::SaleNotFound));
        };
        match window.status_at(self.deps.clock.now()) {
            SaleStatus::NotStarted => {
                return Ok(PurchaseDecision::Rejected(Rejection::SaleNotStarted));
            }
            SaleStatus::Ended => return Ok(PurchaseDecision::Rejected(Rejection::SaleEnded)),
            SaleStatus::Active => {}
        }

        let order_id = self.deps.ids.next_id(&self.id_scope).await?;

        match self
            .deps
            .gate
            .attempt_purchase(voucher_id, user_id, order_id)
            .await?
        {
            AdmissionOutcome::OutOfStock => {
                return Ok(PurchaseDecision::Rejected(Rejection::OutOfStock));
            }
            AdmissionOutcome::Duplicate => {
                return Ok(PurchaseDecision::Rejected(Rejection::Duplicate));
            }
            AdmissionOutcome::Granted => {}
        }

        let intent = OrderIntent::new(order_id, user_id, voucher_id, self.deps.clock.now());
        self.enqueue(&intent).await?;

        Ok(PurchaseDecision::Accepted(order_id))
    }

    /// Append the intent, retrying. The grant is released only when every
    /// attempt was refused outright; an attempt with an unknown outcome may
    /// already be on the stream, and releasing then would resell the unit.
    /// Duplicate entries from retries are absorbed by the materializer's
    /// re-check.
    async fn enqueue(&self, intent: &OrderIntent) -> Result<(), SeckillError> {
        let maybe_stored = AtomicBool::new(false);
        let flag = &maybe_stored;
        let appended = retry_with_predicate(
            self.enqueue_retry.clone(),
            move || async move {
                let result = self.deps.queue.append(intent).await;
                if matches!(&result, Err(e) if !e.is_unstored()) {
                    flag.store(true, Ordering::Relaxed);
                }
                result
            },
            |_| true,
        )
        .await;

        match appended {
            Ok(message_id) => {
                tracing::debug!(
                    order_id = %intent.order_id,
                    user_id = %intent.user_id,
                    voucher_id = %intent.voucher_id,
                    message_id = %message_id,
                    "Order intent enqueued"
                );
                Ok(())
            }
            Err(e) if maybe_stored.load(Ordering::Relaxed) => {
                SeckillMetrics::record_enqueue_failure();
                tracing::error!(
                    error = %e,
                    order_id = %intent.order_id,
                    user_id = %intent.user_id,
                    voucher_id = %intent.voucher_id,
                    "Enqueue outcome unknown, keeping the grant"
                );
                Err(e.into())
            }
            Err(e) => {
                SeckillMetrics::record_enqueue_failure();
                tracing::error!(
                    error = %e,
                    order_id = %intent.order_id,
                    user_id = %intent.user_id,
                    voucher_id = %intent.voucher_id,
                    "Failed to enqueue order intent, releasing grant"
                );
                self.release_grant(intent).await;
                Err(e.into())
            }
        }
    }

    async fn release_grant(&self, intent: &OrderIntent) {
        match self
            .deps
            .gate
            .release(intent.voucher_id, intent.user_id, intent.order_id)
            .await
        {
            Ok(true) => tracing::info!(order_id = %intent.order_id, "Grant released"),
            Ok(false) => tracing::warn!(
                order_id = %intent.order_id,
                "Grant was not held by this order at release"
            ),
            Err(e) => tracing::error!(
                error = %e,
                order_id = %intent.order_id,
                user_id = %intent.user_id,
                voucher_id = %intent.voucher_id,
                "Failed to release grant; the seat stays reserved without an intent"
            ),
        }
    }

    /// Put a voucher on sale: catalogue row first, then hot-path state.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::InvalidSale`] for an invalid definition, or a
    /// store error if either write fails.
    pub async fn publish_sale(&self, sale: &SeckillSale) -> Result<(), SeckillError> {
        sale.validate()?;
        self.deps.orders.save_sale(sale).await?;
        self.deps.sales.load_sale(sale).await?;

        tracing::info!(
            voucher_id = %sale.voucher_id,
            stock = sale.stock,
            begin_time = %sale.begin_time,
            end_time = %sale.end_time,
            "Sale published"
        );
        Ok(())
    }

    /// Look up a materialized order.
    ///
    /// # Errors
    ///
    /// Returns a store error if the lookup fails.
    pub async fn find_order(&self, order_id: OrderId) -> Result<Option<OrderRecord>, SeckillError> {
        Ok(self.deps.orders.find(order_id).await?)
    }
}
