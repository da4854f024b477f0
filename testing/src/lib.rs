//! # Seckill Testing
//!
//! In-memory implementations of every collaborator trait, with failure
//! injection, plus a harness wiring them into a purchase service and
//! materializer workers.
//!
//! - [`InMemoryStockLedger`]: admission gate and sale registry; one mutex
//!   makes each admission atomic, like the server-side script
//! - [`InMemoryOrderQueue`]: stream with consumer groups, pending lists and a
//!   dead-letter list
//! - [`InMemoryLock`]: leased lock with expiry
//! - [`InMemoryOrderRepository`]: order records and sale catalogue
//! - [`InMemoryCounter`]: sequence counter
//! - [`InMemoryPipeline`]: everything above, assembled
//!
//! ## Example
//!
//! ```
//! use seckill_testing::InMemoryPipeline;
//! use seckill_core::{UserId, VoucherId};
//! use seckill_runtime::PurchaseDecision;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let pipeline = InMemoryPipeline::new();
//! pipeline.publish(VoucherId(1), 1).await;
//!
//! let decision = pipeline.service.attempt_purchase(VoucherId(1), UserId(7)).await;
//! assert!(matches!(decision, Ok(PurchaseDecision::Accepted(_))));
//! # }
//! ```

mod counter;
mod ledger;
mod lock;
mod pipeline;
mod queue;
mod repository;

pub use counter::InMemoryCounter;
pub use ledger::InMemoryStockLedger;
pub use lock::InMemoryLock;
pub use pipeline::InMemoryPipeline;
pub use queue::InMemoryOrderQueue;
pub use repository::InMemoryOrderRepository;

use chrono::{DateTime, Utc};
use seckill_core::environment::Clock;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex};

    /// Fixed clock for deterministic tests.
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that tests move by hand.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Start at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Jump to `time`.
        #[allow(clippy::unwrap_used)]
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap() = time;
        }

        /// Move forward by `by`.
        #[allow(clippy::unwrap_used)]
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap();
            *time += by;
        }
    }

    impl Clock for ManualClock {
        #[allow(clippy::unwrap_used)]
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap()
        }
    }

    /// Default test instant: 2026-06-01 12:00:00 UTC.
    ///
    /// # Panics
    ///
    /// Never in practice; the timestamp is hardcoded.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-06-01T12:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }

    /// A [`FixedClock`] at [`test_time`].
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_time())
    }
}

/// Install a `tracing` subscriber for test output; safe to call repeatedly.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
