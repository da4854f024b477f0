//! The whole pipeline over in-memory collaborators.

#![allow(clippy::expect_used, clippy::panic)] // Test infrastructure fails loudly
#![allow(clippy::missing_panics_doc)]

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use seckill_core::environment::Clock;
use seckill_core::id::{IdGenerator, SequenceCounter};
use seckill_core::queue::DEFAULT_GROUP;
use seckill_core::sale::SeckillSale;
use seckill_core::VoucherId;
use seckill_runtime::retry::RetryPolicy;
use seckill_runtime::{
    Materializer, MaterializerConfig, PurchaseDependencies, SeckillService, WorkerState,
};

use crate::mocks::{ManualClock, test_time};
use crate::{
    InMemoryCounter, InMemoryLock, InMemoryOrderQueue, InMemoryOrderRepository,
    InMemoryStockLedger,
};

/// Upper bound on worker steps in [`InMemoryPipeline::drain`].
const MAX_DRAIN_STEPS: usize = 10_000;

/// A purchase service and a materializer sharing one set of in-memory stores.
///
/// Every store is public so tests can inject failures and inspect state.
/// The clock starts at [`test_time`]; the default group already exists.
#[derive(Clone)]
pub struct InMemoryPipeline {
    /// Stock, markers and sale windows.
    pub ledger: InMemoryStockLedger,
    /// Intake stream.
    pub queue: InMemoryOrderQueue,
    /// Per-user locks.
    pub lock: InMemoryLock,
    /// Order records and sale catalogue.
    pub orders: InMemoryOrderRepository,
    /// Id sequence counters.
    pub counter: InMemoryCounter,
    /// Shared clock.
    pub clock: ManualClock,
    /// Purchase path.
    pub service: SeckillService,
    /// Worker `c1` of the default group.
    pub materializer: Materializer,
}

impl Default for InMemoryPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPipeline {
    /// Assemble a pipeline with fast retries and short blocking reads.
    #[must_use]
    pub fn new() -> Self {
        let ledger = InMemoryStockLedger::new();
        let queue = InMemoryOrderQueue::new();
        let lock = InMemoryLock::new();
        let orders = InMemoryOrderRepository::new();
        let counter = InMemoryCounter::new();
        let clock = ManualClock::new(test_time());

        queue.create_group(DEFAULT_GROUP);

        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let ids = IdGenerator::with_default_epoch(
            Arc::new(counter.clone()) as Arc<dyn SequenceCounter>,
            Arc::clone(&shared_clock),
        );

        let service = SeckillService::new(PurchaseDependencies {
            gate: Arc::new(ledger.clone()),
            queue: Arc::new(queue.clone()),
            sales: Arc::new(ledger.clone()),
            orders: Arc::new(orders.clone()),
            ids,
            clock: Arc::clone(&shared_clock),
        })
        .with_enqueue_retry(fast_retry(2));

        let materializer = Materializer::new(
            Arc::new(queue.clone()),
            Arc::new(lock.clone()),
            Arc::new(orders.clone()),
            shared_clock,
            MaterializerConfig {
                read_block: Duration::from_millis(20),
                recovery_backoff: fast_retry(0),
                ..MaterializerConfig::default()
            },
        );

        Self {
            ledger,
            queue,
            lock,
            orders,
            counter,
            clock,
            service,
            materializer,
        }
    }

    /// Publish a sale of `stock` units open from an hour ago to an hour from now.
    pub async fn publish(&self, voucher_id: VoucherId, stock: i64) -> SeckillSale {
        let now = self.clock.now();
        let sale = SeckillSale {
            voucher_id,
            stock,
            begin_time: now - TimeDelta::hours(1),
            end_time: now + TimeDelta::hours(1),
        };
        self.service
            .publish_sale(&sale)
            .await
            .expect("in-memory publish should succeed");
        sale
    }

    /// The default worker under another consumer name.
    #[must_use]
    pub fn worker(&self, consumer: &str) -> Materializer {
        self.materializer.clone().with_consumer(consumer)
    }

    /// Step the default worker from recovery until a live read comes back empty.
    ///
    /// Returns the number of entries acknowledged from live reads.
    pub async fn drain(&self) -> usize {
        let mut state = WorkerState::Recovery { attempt: 0 };
        let mut acknowledged = 0;

        for _ in 0..MAX_DRAIN_STEPS {
            let previous = state.clone();
            state = self.materializer.step(state).await;
            match (&previous, &state) {
                (WorkerState::LiveRead, WorkerState::LiveRead) => return acknowledged,
                (WorkerState::Ack(_), WorkerState::LiveRead) => acknowledged += 1,
                _ => {}
            }
        }

        panic!("materializer did not settle within {MAX_DRAIN_STEPS} steps");
    }
}

fn fast_retry(max_retries: usize) -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(max_retries)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(5))
        .build()
}
