//! `PostgreSQL` order repository for the seckill pipeline.
//!
//! Owns two tables (see `migrations/`):
//!
//! - `tb_seckill_voucher`: sale catalogue and the relational mirror of stock
//! - `tb_voucher_order`: materialized orders, unique on `(user_id, voucher_id)`
//!
//! Materialization is a single transaction:
//!
//! 1. re-check for an existing order of this user for this voucher
//! 2. decrement the relational stock, guarded by `stock > 0`
//! 3. insert the order, `ON CONFLICT DO NOTHING`
//!
//! The fast store is the authority on stock; a failed guard in step 2 is
//! logged as a ledger mismatch and does not block the order.
//!
//! # Example
//!
//! ```ignore
//! use seckill_postgres::PostgresOrderRepository;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let repository = PostgresOrderRepository::new("postgres://localhost/seckill").await?;
//!     repository.migrate().await?;
//!     Ok(())
//! }
//! ```

use chrono::{DateTime, Utc};
use seckill_core::health::HealthProbe;
use seckill_core::repository::{OrderRepository, PersistOutcome};
use seckill_core::sale::SeckillSale;
use seckill_core::{BoxFuture, OrderId, OrderRecord, StoreError, UserId, VoucherId};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;

/// Pool sizing for [`PostgresOrderRepository::connect_with`].
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Maximum pool size.
    pub max_connections: u32,
    /// Connections kept open when idle.
    pub min_connections: u32,
    /// Acquire timeout.
    pub connect_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

fn db_error(context: &str, e: &sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::ConnectionFailed(format!("{context}: {e}"))
        }
        _ => StoreError::CommandFailed(format!("{context}: {e}")),
    }
}

/// [`OrderRepository`] on `PostgreSQL`.
#[derive(Clone)]
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    /// Connect with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConnectionFailed`] if the database is unreachable.
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        Self::connect_with(database_url, &PoolSettings::default()).await
    }

    /// Connect with explicit pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConnectionFailed`] if the database is unreachable.
    pub async fn connect_with(database_url: &str, settings: &PoolSettings) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.connect_timeout)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::ConnectionFailed(format!("Failed to connect: {e}")))?;

        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the tables if they don't exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CommandFailed`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::CommandFailed(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Relational stock of a sale, `None` if the sale is not in the catalogue.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn sale_stock(&self, voucher_id: VoucherId) -> Result<Option<i64>, StoreError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT stock FROM tb_seckill_voucher WHERE voucher_id = $1")
                .bind(voucher_id.value())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("Failed to read sale stock", &e))?;
        Ok(row.map(|(stock,)| stock))
    }

    async fn persist_in_tx(&self, record: &OrderRecord) -> Result<PersistOutcome, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", &e))?;

        let existing: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM tb_voucher_order WHERE user_id = $1 AND voucher_id = $2",
        )
        .bind(record.user_id.value())
        .bind(record.voucher_id.value())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to check existing order", &e))?;

        if let Some((existing_id,)) = existing {
            tx.rollback()
                .await
                .map_err(|e| db_error("Failed to roll back", &e))?;
            tracing::info!(
                order_id = %record.order_id,
                existing_order_id = existing_id,
                user_id = %record.user_id,
                voucher_id = %record.voucher_id,
                "Order already materialized for user"
            );
            return Ok(PersistOutcome::AlreadyExists);
        }

        let decremented = sqlx::query(
            r"
            UPDATE tb_seckill_voucher
            SET stock = stock - 1, update_time = now()
            WHERE voucher_id = $1 AND stock > 0
            ",
        )
        .bind(record.voucher_id.value())
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to decrement relational stock", &e))?
        .rows_affected();

        if decremented == 0 {
            tracing::warn!(
                order_id = %record.order_id,
                voucher_id = %record.voucher_id,
                "Relational stock mismatch: no unit left to decrement"
            );
            metrics::counter!("seckill_stock_mismatches_total").increment(1);
        }

        let inserted = sqlx::query(
            r"
            INSERT INTO tb_voucher_order (id, user_id, voucher_id, create_time)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT DO NOTHING
            ",
        )
        .bind(record.order_id.value())
        .bind(record.user_id.value())
        .bind(record.voucher_id.value())
        .bind(record.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to insert order", &e))?
        .rows_affected();

        if inserted == 0 {
            // Lost a race with a concurrent writer; keep the stock untouched
            tx.rollback()
                .await
                .map_err(|e| db_error("Failed to roll back", &e))?;
            return Ok(PersistOutcome::AlreadyExists);
        }

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit order", &e))?;

        Ok(PersistOutcome::Created)
    }
}

impl OrderRepository for PostgresOrderRepository {
    fn exists_for(
        &self,
        user_id: UserId,
        voucher_id: VoucherId,
    ) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(async move {
            let (exists,): (bool,) = sqlx::query_as(
                "SELECT EXISTS (SELECT 1 FROM tb_voucher_order WHERE user_id = $1 AND voucher_id = $2)",
            )
            .bind(user_id.value())
            .bind(voucher_id.value())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("Failed to check existing order", &e))?;
            Ok(exists)
        })
    }

    fn persist(&self, record: &OrderRecord) -> BoxFuture<'_, Result<PersistOutcome, StoreError>> {
        let record = record.clone();
        Box::pin(async move { self.persist_in_tx(&record).await })
    }

    fn find(&self, order_id: OrderId) -> BoxFuture<'_, Result<Option<OrderRecord>, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT id, user_id, voucher_id, create_time FROM tb_voucher_order WHERE id = $1",
            )
            .bind(order_id.value())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load order", &e))?;

            row.map(|row| {
                Ok(OrderRecord {
                    order_id: OrderId(row.try_get("id").map_err(|e| db_error("id", &e))?),
                    user_id: UserId(row.try_get("user_id").map_err(|e| db_error("user_id", &e))?),
                    voucher_id: VoucherId(
                        row.try_get("voucher_id")
                            .map_err(|e| db_error("voucher_id", &e))?,
                    ),
                    created_at: row
                        .try_get::<DateTime<Utc>, _>("create_time")
                        .map_err(|e| db_error("create_time", &e))?,
                })
            })
            .transpose()
        })
    }

    fn save_sale(&self, sale: &SeckillSale) -> BoxFuture<'_, Result<(), StoreError>> {
        let sale = sale.clone();
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO tb_seckill_voucher (voucher_id, stock, begin_time, end_time)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (voucher_id) DO UPDATE
                SET stock = EXCLUDED.stock,
                    begin_time = EXCLUDED.begin_time,
                    end_time = EXCLUDED.end_time,
                    update_time = now()
                ",
            )
            .bind(sale.voucher_id.value())
            .bind(sale.stock)
            .bind(sale.begin_time)
            .bind(sale.end_time)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to save sale", &e))?;

            Ok(())
        })
    }
}

impl HealthProbe for PostgresOrderRepository {
    fn component(&self) -> &'static str {
        "postgres"
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(|e| db_error("Ping failed", &e))?;
            Ok(())
        })
    }
}
