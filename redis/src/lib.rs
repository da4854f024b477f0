//! # Seckill Redis
//!
//! `Redis` implementations of the hot-path collaborators:
//!
//! | trait | type | primitive |
//! |---|---|---|
//! | [`AdmissionGate`](seckill_core::admission::AdmissionGate) | [`RedisAdmissionGate`] | Lua script (`EVALSHA`) |
//! | [`OrderQueue`](seckill_core::queue::OrderQueue) | [`RedisOrderQueue`] | Streams + consumer groups |
//! | [`DistributedLock`](seckill_core::lock::DistributedLock) | [`RedisLock`] | `SET NX PX` + compare-and-delete script |
//! | [`SequenceCounter`](seckill_core::id::SequenceCounter) | [`RedisSequenceCounter`] | `INCR` + `EXPIRE` |
//! | [`SaleRegistry`](seckill_core::sale::SaleRegistry) | [`RedisSaleRegistry`] | `MULTI` pipeline |
//!
//! All of them share one [`RedisBackend`]: a client plus a
//! [`ConnectionManager`] (auto-reconnecting, multiplexed). Blocking stream
//! reads use a dedicated connection per consumer so they never stall the
//! shared one.
//!
//! # Example
//!
//! ```no_run
//! use seckill_redis::RedisBackend;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = RedisBackend::connect("redis://127.0.0.1:6379").await?;
//! let gate = backend.admission_gate();
//! let queue = backend.order_queue("stream.orders");
//! # let _ = (gate, queue);
//! # Ok(())
//! # }
//! ```

use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use seckill_core::health::HealthProbe;
use seckill_core::{BoxFuture, StoreError};

mod admission;
mod counter;
pub mod keys;
mod lock;
mod queue;
mod sale;

pub use admission::RedisAdmissionGate;
pub use counter::RedisSequenceCounter;
pub use lock::RedisLock;
pub use queue::RedisOrderQueue;
pub use sale::RedisSaleRegistry;

/// Shared `Redis` handles.
#[derive(Clone)]
pub struct RedisBackend {
    client: Client,
    conn_manager: ConnectionManager,
}

impl RedisBackend {
    /// Connect to `Redis`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConnectionFailed`] if the URL is invalid or the
    /// server is unreachable.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url).map_err(|e| {
            StoreError::ConnectionFailed(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client.clone()).await.map_err(|e| {
            StoreError::ConnectionFailed(format!("Failed to create Redis connection manager: {e}"))
        })?;

        tracing::info!("Connected to Redis");

        Ok(Self {
            client,
            conn_manager,
        })
    }

    /// The shared connection manager.
    #[must_use]
    pub fn connection(&self) -> ConnectionManager {
        self.conn_manager.clone()
    }

    /// Admission gate over the stock and marker keys.
    #[must_use]
    pub fn admission_gate(&self) -> RedisAdmissionGate {
        RedisAdmissionGate::new(self.connection())
    }

    /// Order queue on `stream`.
    #[must_use]
    pub fn order_queue(&self, stream: impl Into<String>) -> RedisOrderQueue {
        RedisOrderQueue::new(self.client.clone(), self.connection(), stream)
    }

    /// Lease lock.
    #[must_use]
    pub fn lock(&self) -> RedisLock {
        RedisLock::new(self.connection())
    }

    /// Daily id counter.
    #[must_use]
    pub fn sequence_counter(&self) -> RedisSequenceCounter {
        RedisSequenceCounter::new(self.connection())
    }

    /// Sale registry.
    #[must_use]
    pub fn sale_registry(&self) -> RedisSaleRegistry {
        RedisSaleRegistry::new(self.connection())
    }
}

impl HealthProbe for RedisBackend {
    fn component(&self) -> &'static str {
        "redis"
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        let mut conn = self.connection();
        Box::pin(async move {
            let _: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(|e| store_error("PING", &e))?;
            Ok(())
        })
    }
}

/// Classify a `Redis` error as a connection or command failure.
pub(crate) fn store_error(context: &str, e: &RedisError) -> StoreError {
    if e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error() || e.is_timeout()
    {
        StoreError::ConnectionFailed(format!("{context}: {e}"))
    } else {
        StoreError::CommandFailed(format!("{context}: {e}"))
    }
}
