//! # Seckill Core
//!
//! Domain types and collaborator traits for the flash-sale ("seckill") voucher
//! purchase pipeline.
//!
//! The pipeline has two halves joined by a durable queue:
//!
//! ```text
//!  HTTP request
//!      │
//!      ▼
//! ┌───────────────────┐   GRANTED    ┌────────────────────┐
//! │  Admission Gate   │────────────▶│ Order Intake Queue │
//! │ (atomic script)   │  enqueue     │ (consumer groups)  │
//! └───────────────────┘              └─────────┬──────────┘
//!      │ orderId returned                      │ at-least-once
//!      ▼ immediately                           ▼
//!   client                          ┌────────────────────┐
//!                                   │ Order Materializer │── per-user lease
//!                                   │  (worker pool)     │── order record
//!                                   └────────────────────┘
//! ```
//!
//! This crate owns no I/O. Every external system is a trait:
//!
//! - [`admission::AdmissionGate`] - atomic stock + idempotency check
//! - [`queue::OrderQueue`] - stream with consumer groups and pending lists
//! - [`lock::DistributedLock`] - leased mutual exclusion
//! - [`id::SequenceCounter`] - daily counter behind [`id::IdGenerator`]
//! - [`sale::SaleRegistry`] - sale windows and stock provisioning
//! - [`repository::OrderRepository`] - durable order records
//!
//! Implementations live in `seckill-redis`, `seckill-postgres` and
//! `seckill-testing`.

pub mod admission;
pub mod error;
pub mod health;
pub mod id;
pub mod lock;
pub mod queue;
pub mod repository;
pub mod sale;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use error::{SeckillError, StoreError};
pub use types::{AdmissionOutcome, OrderId, OrderIntent, OrderRecord, UserId, VoucherId};

/// Boxed future returned by collaborator traits.
///
/// Traits return boxed futures instead of `async fn` so they stay usable as
/// trait objects (`Arc<dyn OrderQueue>`), which is how the runtime wires them.
pub type BoxFuture<'a, T> = futures::future::BoxFuture<'a, T>;

/// Environment module - injected dependencies that are not stores.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock backed by [`Utc::now`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
