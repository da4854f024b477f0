//! In-memory sequence counter.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use seckill_core::id::SequenceCounter;
use seckill_core::{BoxFuture, StoreError};

#[derive(Debug, Default)]
struct CounterState {
    values: HashMap<String, i64>,
    fail_increments: usize,
}

/// Counters in a map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCounter {
    state: Arc<Mutex<CounterState>>,
}

impl InMemoryCounter {
    /// All counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `key`.
    #[must_use]
    pub fn value(&self, key: &str) -> i64 {
        self.state.lock().unwrap().values.get(key).copied().unwrap_or(0)
    }

    /// Fail the next `n` increments.
    pub fn fail_next_increments(&self, n: usize) {
        self.state.lock().unwrap().fail_increments = n;
    }
}

impl SequenceCounter for InMemoryCounter {
    fn increment(&self, key: &str) -> BoxFuture<'_, Result<i64, StoreError>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if state.fail_increments > 0 {
                state.fail_increments -= 1;
                return Err(StoreError::ConnectionFailed("injected counter failure".to_string()));
            }
            let value = state.values.entry(key).or_insert(0);
            *value += 1;
            Ok(*value)
        })
    }
}
