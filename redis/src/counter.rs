//! Daily sequence counter.

use redis::aio::ConnectionManager;
use seckill_core::id::SequenceCounter;
use seckill_core::{BoxFuture, StoreError};

use crate::store_error;

/// Counter keys outlive their day by a margin so late readers still see them.
const COUNTER_TTL_SECS: i64 = 2 * 24 * 60 * 60;

/// [`SequenceCounter`] backed by `INCR`.
#[derive(Clone)]
pub struct RedisSequenceCounter {
    conn_manager: ConnectionManager,
}

impl RedisSequenceCounter {
    /// Create a counter on an existing connection.
    #[must_use]
    pub const fn new(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }
}

impl SequenceCounter for RedisSequenceCounter {
    fn increment(&self, key: &str) -> BoxFuture<'_, Result<i64, StoreError>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();

            let (value,): (i64,) = redis::pipe()
                .atomic()
                .incr(&key, 1)
                .expire(&key, COUNTER_TTL_SECS)
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| store_error(&format!("Failed to increment {key}"), &e))?;

            Ok(value)
        })
    }
}
