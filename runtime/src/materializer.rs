//! Order materializer: turns queued intents into order records.
//!
//! Each worker is a state machine over one consumer identity:
//!
//! ```text
//!            ┌──────────── empty read ───────────┐
//!            ▼                                   │
//!   ┌──▶ LiveRead ── entry ──▶ Process ── ok ──▶ Ack ── ok ──┐
//!   │        │                   │                 │          │
//!   │        └──── failure ──────┴──── failure ────┘          │
//!   │                            ▼                            │
//!   └─── pending list drained ─ Recovery ◀── (startup)        │
//!   ▲                                                         │
//!   └─────────────────────────────────────────────────────────┘
//! ```
//!
//! - Nothing is acknowledged before its record is durable (or found to exist).
//! - Recovery replays this consumer's pending list until it is empty, and
//!   backs off between failed passes.
//! - Workers start in `Recovery` so a restart first finishes what a crashed
//!   predecessor with the same identity left pending.
//! - Shutdown is only observed while waiting (blocking read, backoff sleep).

use std::sync::Arc;
use std::time::Duration;

use seckill_core::environment::Clock;
use seckill_core::lock::{DistributedLock, order_lock_name};
use seckill_core::queue::{DEFAULT_GROUP, Delivery, OrderQueue};
use seckill_core::repository::{OrderRepository, PersistOutcome};
use seckill_core::{OrderIntent, OrderRecord, SeckillError};
use tokio::sync::broadcast;

use crate::metrics::SeckillMetrics;
use crate::retry::RetryPolicy;

/// Worker settings.
#[derive(Debug, Clone)]
pub struct MaterializerConfig {
    /// Consumer group.
    pub group: String,
    /// Consumer name, unique per worker.
    pub consumer: String,
    /// Longest wait of one live read.
    pub read_block: Duration,
    /// Lease on the per-user lock.
    pub lock_lease: Duration,
    /// Pending entries fetched per recovery read.
    pub recovery_batch: usize,
    /// Backoff between failed recovery passes (`max_retries` unused).
    pub recovery_backoff: RetryPolicy,
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP.to_string(),
            consumer: "c1".to_string(),
            read_block: Duration::from_secs(2),
            lock_lease: Duration::from_secs(10),
            recovery_batch: 1,
            recovery_backoff: RetryPolicy::builder()
                .initial_delay(Duration::from_millis(20))
                .max_delay(Duration::from_secs(2))
                .build(),
        }
    }
}

/// Where a worker is in its cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for a new entry.
    LiveRead,
    /// Materializing a delivered entry.
    Process(Delivery),
    /// Acknowledging a processed entry.
    Ack(Delivery),
    /// Draining the pending list; `attempt` counts consecutive failed passes.
    Recovery {
        /// Failed passes so far.
        attempt: usize,
    },
}

/// What processing one delivery did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// A new order record was written.
    Created,
    /// The order already existed; nothing written.
    AlreadyExists,
    /// The entry was undecodable and moved to the dead-letter stream.
    DeadLettered,
}

/// One materializer worker.
#[derive(Clone)]
pub struct Materializer {
    queue: Arc<dyn OrderQueue>,
    lock: Arc<dyn DistributedLock>,
    orders: Arc<dyn OrderRepository>,
    clock: Arc<dyn Clock>,
    config: MaterializerConfig,
}

impl Materializer {
    /// Create a worker.
    #[must_use]
    pub fn new(
        queue: Arc<dyn OrderQueue>,
        lock: Arc<dyn DistributedLock>,
        orders: Arc<dyn OrderRepository>,
        clock: Arc<dyn Clock>,
        config: MaterializerConfig,
    ) -> Self {
        Self {
            queue,
            lock,
            orders,
            clock,
            config,
        }
    }

    /// Worker settings.
    #[must_use]
    pub const fn config(&self) -> &MaterializerConfig {
        &self.config
    }

    /// Same worker under another consumer name.
    #[must_use]
    pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.config.consumer = consumer.into();
        self
    }

    /// Run one transition.
    pub async fn step(&self, state: WorkerState) -> WorkerState {
        let group = self.config.group.as_str();
        let consumer = self.config.consumer.as_str();

        match state {
            WorkerState::LiveRead => {
                match self
                    .queue
                    .read_next(group, consumer, self.config.read_block)
                    .await
                {
                    Ok(Some(delivery)) => WorkerState::Process(delivery),
                    Ok(None) => WorkerState::LiveRead,
                    Err(e) => self.fail("read", &SeckillError::from(e)),
                }
            }
            WorkerState::Process(delivery) => match self.process(&delivery).await {
                Ok(_) => WorkerState::Ack(delivery),
                Err(e) => self.fail("process", &e),
            },
            WorkerState::Ack(delivery) => {
                match self.queue.acknowledge(group, &delivery.id).await {
                    Ok(()) => WorkerState::LiveRead,
                    Err(e) => self.fail("acknowledge", &SeckillError::from(e)),
                }
            }
            WorkerState::Recovery { attempt } => match self.recover().await {
                Ok(replayed) => {
                    if replayed > 0 || attempt > 0 {
                        tracing::info!(consumer, replayed, "Recovery complete");
                    }
                    WorkerState::LiveRead
                }
                Err(e) => {
                    tracing::warn!(
                        consumer,
                        attempt,
                        error = %e,
                        "Recovery pass failed, backing off"
                    );
                    WorkerState::Recovery {
                        attempt: attempt + 1,
                    }
                }
            },
        }
    }

    fn fail(&self, stage: &'static str, error: &SeckillError) -> WorkerState {
        tracing::warn!(
            consumer = %self.config.consumer,
            stage,
            error = %error,
            "Materializer cycle failed, entering recovery"
        );
        SeckillMetrics::record_recovery();
        WorkerState::Recovery { attempt: 0 }
    }

    /// Replay this consumer's pending entries until none are left.
    ///
    /// Returns the number of entries replayed.
    ///
    /// # Errors
    ///
    /// Returns the first failure; entries not yet acknowledged stay pending.
    pub async fn recover(&self) -> Result<usize, SeckillError> {
        let group = self.config.group.as_str();
        let consumer = self.config.consumer.as_str();
        let mut replayed = 0;

        loop {
            let pending = self
                .queue
                .read_pending(group, consumer, self.config.recovery_batch)
                .await?;
            if pending.is_empty() {
                return Ok(replayed);
            }

            for delivery in pending {
                self.process(&delivery).await?;
                self.queue.acknowledge(group, &delivery.id).await?;
                replayed += 1;
            }
        }
    }

    /// Materialize one delivery under the buyer's lock.
    ///
    /// Undecodable entries are dead-lettered and count as processed.
    ///
    /// # Errors
    ///
    /// [`SeckillError::LockBusy`] if another worker holds the buyer's lock,
    /// or any lock, store, or dead-letter failure.
    pub async fn process(&self, delivery: &Delivery) -> Result<ProcessOutcome, SeckillError> {
        let intent = match delivery.intent() {
            Ok(intent) => intent,
            Err(e) => {
                self.queue.dead_letter(delivery, &e.to_string()).await?;
                SeckillMetrics::record_dead_letter();
                tracing::error!(
                    message_id = %delivery.id,
                    error = %e,
                    "Undecodable order intent moved to dead-letter stream"
                );
                return Ok(ProcessOutcome::DeadLettered);
            }
        };

        let lock_name = order_lock_name(intent.user_id);
        let Some(lease) = self
            .lock
            .try_acquire(&lock_name, self.config.lock_lease)
            .await?
        else {
            tracing::warn!(
                order_id = %intent.order_id,
                user_id = %intent.user_id,
                lock = %lock_name,
                "Order lock is held elsewhere, leaving intent pending"
            );
            return Err(SeckillError::LockBusy(lock_name));
        };

        let result = self.materialize(&intent).await;

        if let Err(e) = self.lock.release(&lease).await {
            tracing::warn!(lock = %lease.name, error = %e, "Failed to release order lock");
        }

        result
    }

    async fn materialize(&self, intent: &OrderIntent) -> Result<ProcessOutcome, SeckillError> {
        let existing = self
            .orders
            .exists_for(intent.user_id, intent.voucher_id)
            .await
            .inspect_err(|_| SeckillMetrics::record_materialized("failed"))?;

        if existing {
            tracing::info!(
                order_id = %intent.order_id,
                user_id = %intent.user_id,
                voucher_id = %intent.voucher_id,
                "Order already materialized, skipping"
            );
            SeckillMetrics::record_materialized(PersistOutcome::AlreadyExists.as_str());
            return Ok(ProcessOutcome::AlreadyExists);
        }

        let record = OrderRecord::from_intent(intent, self.clock.now());
        let outcome = self.orders.persist(&record).await.map_err(|e| {
            SeckillMetrics::record_materialized("failed");
            tracing::error!(
                order_id = %intent.order_id,
                error = %e,
                "Failed to persist order"
            );
            SeckillError::from(e)
        })?;

        SeckillMetrics::record_materialized(outcome.as_str());
        tracing::info!(
            order_id = %record.order_id,
            user_id = %record.user_id,
            voucher_id = %record.voucher_id,
            outcome = outcome.as_str(),
            "Order materialized"
        );

        Ok(match outcome {
            PersistOutcome::Created => ProcessOutcome::Created,
            PersistOutcome::AlreadyExists => ProcessOutcome::AlreadyExists,
        })
    }

    /// Run until `shutdown` fires (or its sender is dropped).
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            consumer = %self.config.consumer,
            group = %self.config.group,
            "Materializer started"
        );

        let mut state = WorkerState::Recovery { attempt: 0 };
        loop {
            state = match state {
                WorkerState::LiveRead => {
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        next = self.step(WorkerState::LiveRead) => next,
                    }
                }
                WorkerState::Recovery { attempt } if attempt > 0 => {
                    let delay = self.config.recovery_backoff.delay_for_attempt(attempt - 1);
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        () = tokio::time::sleep(delay) => {
                            self.step(WorkerState::Recovery { attempt }).await
                        }
                    }
                }
                other => self.step(other).await,
            };
        }

        tracing::info!(consumer = %self.config.consumer, "Materializer stopped");
    }
}
