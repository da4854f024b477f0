//! Globally unique, time-ordered order ids.
//!
//! ```text
//!  63                               32 31                                0
//! ┌───────────────────────────────────┬───────────────────────────────────┐
//! │ seconds since epoch (signed)      │ per-day, per-scope sequence        │
//! └───────────────────────────────────┴───────────────────────────────────┘
//! ```
//!
//! The sequence comes from an external incrementing counter keyed by scope and
//! calendar date (`icr:{scope}:{yyyyMMdd}`), so ids from one scope on one day
//! are strictly increasing across every process that shares the counter.

use std::sync::Arc;

use crate::environment::Clock;
use crate::error::{SeckillError, StoreError};
use crate::types::OrderId;
use crate::BoxFuture;

/// Bits reserved for the sequence number.
pub const COUNT_BITS: u32 = 32;

/// Default id epoch: 2026-01-01T00:00:00Z.
pub const DEFAULT_EPOCH_SECS: i64 = 1_767_225_600;

/// Largest sequence number that fits the layout.
pub const MAX_SEQUENCE: i64 = (1_i64 << COUNT_BITS) - 1;

/// External incrementing counter.
pub trait SequenceCounter: Send + Sync {
    /// Atomically increment `key` and return the new value (first call yields 1).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the counter store is unreachable.
    fn increment(&self, key: &str) -> BoxFuture<'_, Result<i64, StoreError>>;
}

/// Counter key for `scope` on the date of `now`.
#[must_use]
pub fn counter_key(scope: &str, now: chrono::DateTime<chrono::Utc>) -> String {
    format!("icr:{scope}:{}", now.format("%Y%m%d"))
}

/// Pack a timestamp and a sequence number into an id.
#[must_use]
pub const fn compose(elapsed_secs: i64, sequence: i64) -> OrderId {
    OrderId((elapsed_secs << COUNT_BITS) | (sequence & MAX_SEQUENCE))
}

/// Order id generator backed by a [`SequenceCounter`].
#[derive(Clone)]
pub struct IdGenerator {
    counter: Arc<dyn SequenceCounter>,
    clock: Arc<dyn Clock>,
    epoch_secs: i64,
}

impl IdGenerator {
    /// Create a generator with an explicit epoch.
    #[must_use]
    pub fn new(counter: Arc<dyn SequenceCounter>, clock: Arc<dyn Clock>, epoch_secs: i64) -> Self {
        Self {
            counter,
            clock,
            epoch_secs,
        }
    }

    /// Create a generator using [`DEFAULT_EPOCH_SECS`].
    #[must_use]
    pub fn with_default_epoch(counter: Arc<dyn SequenceCounter>, clock: Arc<dyn Clock>) -> Self {
        Self::new(counter, clock, DEFAULT_EPOCH_SECS)
    }

    /// Generate the next id for `scope`.
    ///
    /// Timestamps before the epoch clamp to zero.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::IdGeneration`] if the counter fails or the day's
    /// sequence space is exhausted.
    pub async fn next_id(&self, scope: &str) -> Result<OrderId, SeckillError> {
        let now = self.clock.now();
        let elapsed = (now.timestamp() - self.epoch_secs).max(0);

        let key = counter_key(scope, now);
        let sequence = self
            .counter
            .increment(&key)
            .await
            .map_err(|e| SeckillError::IdGeneration(format!("Failed to increment {key}: {e}")))?;

        if !(0..=MAX_SEQUENCE).contains(&sequence) {
            return Err(SeckillError::IdGeneration(format!(
                "sequence {sequence} for {key} exceeds {COUNT_BITS} bits"
            )));
        }

        Ok(compose(elapsed, sequence))
    }
}

impl std::fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdGenerator")
            .field("epoch_secs", &self.epoch_secs)
            .finish_non_exhaustive()
    }
}
