//! Resource setup: connect stores, run migrations, wire the pipeline.
//!
//! ```rust,ignore
//! let config = Config::from_env();
//! let resources = ResourceManager::from_config(&config).await?;
//! let service = resources.service();
//! let worker = resources.materializer();
//! ```

use std::sync::Arc;

use seckill_core::environment::{Clock, SystemClock};
use seckill_core::id::IdGenerator;
use seckill_core::queue::OrderQueue;
use seckill_postgres::PostgresOrderRepository;
use seckill_redis::{RedisBackend, RedisOrderQueue};
use seckill_runtime::{Materializer, PurchaseDependencies, SeckillService};
use seckill_web::AppState;
use tracing::info;

use crate::config::Config;

/// Connected infrastructure, shared by the HTTP layer and the workers.
#[derive(Clone)]
pub struct ResourceManager {
    /// Application configuration
    pub config: Arc<Config>,

    /// System clock for timestamps
    pub clock: Arc<dyn Clock>,

    /// Redis connections (admission, queue, locks, counters, sale windows)
    pub redis: RedisBackend,

    /// Intake stream
    pub queue: RedisOrderQueue,

    /// Order records and sale catalogue
    pub orders: PostgresOrderRepository,
}

impl ResourceManager {
    /// Connect to Redis and `PostgreSQL`, run migrations and create the
    /// consumer group.
    ///
    /// # Errors
    ///
    /// Returns error if a connection, the migrations, or the group creation fails.
    pub async fn from_config(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        info!("Connecting to order database...");
        let orders =
            PostgresOrderRepository::connect_with(&config.postgres.url, &config.pool_settings())
                .await?;

        info!("Running order database migrations...");
        orders.migrate().await?;
        info!("Order database ready");

        info!("Connecting to Redis...");
        let redis = RedisBackend::connect(&config.redis.url).await?;
        let queue = redis.order_queue(config.seckill.order_stream.clone());

        queue.ensure_group(&config.seckill.order_group).await?;
        info!(
            stream = %config.seckill.order_stream,
            group = %config.seckill.order_group,
            "Order stream ready"
        );

        Ok(Self {
            config: Arc::new(config.clone()),
            clock: Arc::new(SystemClock),
            redis,
            queue,
            orders,
        })
    }

    /// The purchase service.
    #[must_use]
    pub fn service(&self) -> SeckillService {
        let ids = IdGenerator::new(
            Arc::new(self.redis.sequence_counter()),
            Arc::clone(&self.clock),
            self.config.seckill.id_epoch_secs,
        );

        SeckillService::new(PurchaseDependencies {
            gate: Arc::new(self.redis.admission_gate()),
            queue: Arc::new(self.queue.clone()),
            sales: Arc::new(self.redis.sale_registry()),
            orders: Arc::new(self.orders.clone()),
            ids,
            clock: Arc::clone(&self.clock),
        })
        .with_id_scope(self.config.seckill.id_scope.clone())
    }

    /// Worker template for the materializer pool.
    #[must_use]
    pub fn materializer(&self) -> Materializer {
        Materializer::new(
            Arc::new(self.queue.clone()),
            Arc::new(self.redis.lock()),
            Arc::new(self.orders.clone()),
            Arc::clone(&self.clock),
            self.config.materializer_config(),
        )
    }

    /// HTTP state with readiness probes for both stores.
    #[must_use]
    pub fn app_state(&self) -> AppState {
        AppState::new(self.service())
            .with_probe(Arc::new(self.redis.clone()))
            .with_probe(Arc::new(self.orders.clone()))
    }
}
