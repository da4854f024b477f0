//! Admission gate as a server-side Lua script.
//!
//! `Redis` runs a script to completion before serving any other command, which
//! is what makes check-and-decrement indivisible here. `redis::Script` sends
//! `EVALSHA` and falls back to `EVAL` on `NOSCRIPT`, so a flushed script cache
//! is not an error.

use redis::aio::ConnectionManager;
use redis::Script;
use seckill_core::admission::AdmissionGate;
use seckill_core::{AdmissionOutcome, BoxFuture, OrderId, SeckillError, UserId, VoucherId};

use crate::keys::{marker_key, stock_key};

/// KEYS = [stock key, marker hash]; ARGV = [userId, orderId].
/// Returns 0 granted, 1 out of stock, 2 duplicate.
const ADMIT_SCRIPT: &str = r"
local stock_key = KEYS[1]
local marker_key = KEYS[2]
local user_id = ARGV[1]
local order_id = ARGV[2]

if redis.call('HEXISTS', marker_key, user_id) == 1 then
    return 2
end

local stock = tonumber(redis.call('GET', stock_key))
if stock == nil or stock <= 0 then
    return 1
end

redis.call('INCRBY', stock_key, -1)
redis.call('HSET', marker_key, user_id, order_id)
return 0
";

/// KEYS = [stock key, marker hash]; ARGV = [userId, orderId].
/// Returns 1 if the marker held `orderId` and was undone, 0 otherwise.
const RELEASE_SCRIPT: &str = r"
if redis.call('HGET', KEYS[2], ARGV[1]) ~= ARGV[2] then
    return 0
end

redis.call('HDEL', KEYS[2], ARGV[1])
redis.call('INCRBY', KEYS[1], 1)
return 1
";

/// [`AdmissionGate`] backed by a Lua script.
#[derive(Clone)]
pub struct RedisAdmissionGate {
    conn_manager: ConnectionManager,
    admit: Script,
    release: Script,
}

impl RedisAdmissionGate {
    /// Create a gate on an existing connection.
    #[must_use]
    pub fn new(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            admit: Script::new(ADMIT_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        }
    }
}

impl AdmissionGate for RedisAdmissionGate {
    fn attempt_purchase(
        &self,
        voucher_id: VoucherId,
        user_id: UserId,
        order_id: OrderId,
    ) -> BoxFuture<'_, Result<AdmissionOutcome, SeckillError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();

            let code: i64 = self
                .admit
                .key(stock_key(voucher_id))
                .key(marker_key(voucher_id))
                .arg(user_id.value())
                .arg(order_id.value())
                .invoke_async(&mut conn)
                .await
                .map_err(|e| {
                    tracing::error!(
                        error = %e,
                        voucher_id = %voucher_id,
                        user_id = %user_id,
                        "Admission script failed"
                    );
                    SeckillError::Admission(format!("Failed to run admission script: {e}"))
                })?;

            AdmissionOutcome::from_code(code)
        })
    }

    fn release(
        &self,
        voucher_id: VoucherId,
        user_id: UserId,
        order_id: OrderId,
    ) -> BoxFuture<'_, Result<bool, SeckillError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();

            let released: i64 = self
                .release
                .key(stock_key(voucher_id))
                .key(marker_key(voucher_id))
                .arg(user_id.value())
                .arg(order_id.value())
                .invoke_async(&mut conn)
                .await
                .map_err(|e| {
                    SeckillError::Admission(format!("Failed to run release script: {e}"))
                })?;

            Ok(released == 1)
        })
    }
}
