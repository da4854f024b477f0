//! Leased lock on a single `Redis` key.
//!
//! Acquire is `SET lock:{name} {token} NX PX {lease}`: one round trip, never
//! waits. Release deletes the key only while it still holds our token, so an
//! expired-then-reacquired lock is never released by the previous holder.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::Script;
use seckill_core::lock::{DistributedLock, LockError, LockLease};
use seckill_core::BoxFuture;

use crate::keys::lock_key;

const UNLOCK_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

/// [`DistributedLock`] backed by `SET NX PX`.
#[derive(Clone)]
pub struct RedisLock {
    conn_manager: ConnectionManager,
    unlock: Script,
}

impl RedisLock {
    /// Create a lock service on an existing connection.
    #[must_use]
    pub fn new(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            unlock: Script::new(UNLOCK_SCRIPT),
        }
    }
}

impl DistributedLock for RedisLock {
    fn try_acquire(
        &self,
        name: &str,
        lease: Duration,
    ) -> BoxFuture<'_, Result<Option<LockLease>, LockError>> {
        let name = name.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let token = uuid::Uuid::new_v4().to_string();
            // PX 0 is rejected by Redis
            let lease_ms = u64::try_from(lease.as_millis()).unwrap_or(u64::MAX).max(1);

            let reply: Option<String> = redis::cmd("SET")
                .arg(lock_key(&name))
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(lease_ms)
                .query_async(&mut conn)
                .await
                .map_err(|e| LockError::CommandFailed {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;

            Ok(reply.map(|_| LockLease { name, token, lease }))
        })
    }

    fn release(&self, lease: &LockLease) -> BoxFuture<'_, Result<bool, LockError>> {
        let lease = lease.clone();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();

            let deleted: i64 = self
                .unlock
                .key(lock_key(&lease.name))
                .arg(&lease.token)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| LockError::CommandFailed {
                    name: lease.name.clone(),
                    reason: e.to_string(),
                })?;

            if deleted == 0 {
                tracing::warn!(lock = %lease.name, "Lock lease had already expired at release");
            }

            Ok(deleted == 1)
        })
    }
}
