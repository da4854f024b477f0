//! In-memory leased lock.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use seckill_core::BoxFuture;
use seckill_core::lock::{DistributedLock, LockError, LockLease};
use tokio::time::Instant;

#[derive(Debug, Default)]
struct LockState {
    held: HashMap<String, (String, Instant)>,
    fail_acquires: usize,
    acquisitions: usize,
}

/// Leased locks that expire on the tokio clock (so paused-time tests work).
#[derive(Debug, Clone, Default)]
pub struct InMemoryLock {
    state: Arc<Mutex<LockState>>,
    tokens: Arc<AtomicU64>,
}

impl InMemoryLock {
    /// No locks held.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` is currently held by anyone.
    #[must_use]
    pub fn is_held(&self, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .held
            .get(name)
            .is_some_and(|(_, expires)| *expires > Instant::now())
    }

    /// Hold `name` as a foreign holder for `lease`.
    pub fn hold(&self, name: &str, lease: Duration) {
        self.state
            .lock()
            .unwrap()
            .held
            .insert(name.to_string(), ("foreign".to_string(), Instant::now() + lease));
    }

    /// Drop a foreign hold on `name`.
    pub fn force_release(&self, name: &str) {
        self.state.lock().unwrap().held.remove(name);
    }

    /// Successful acquisitions so far.
    #[must_use]
    pub fn acquisitions(&self) -> usize {
        self.state.lock().unwrap().acquisitions
    }

    /// Fail the next `n` acquire attempts with a service error.
    pub fn fail_next_acquires(&self, n: usize) {
        self.state.lock().unwrap().fail_acquires = n;
    }
}

impl DistributedLock for InMemoryLock {
    fn try_acquire(
        &self,
        name: &str,
        lease: Duration,
    ) -> BoxFuture<'_, Result<Option<LockLease>, LockError>> {
        let name = name.to_string();
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if state.fail_acquires > 0 {
                state.fail_acquires -= 1;
                return Err(LockError::Unavailable("injected lock failure".to_string()));
            }

            let now = Instant::now();
            if state
                .held
                .get(&name)
                .is_some_and(|(_, expires)| *expires > now)
            {
                return Ok(None);
            }

            let token = format!("token-{}", self.tokens.fetch_add(1, Ordering::SeqCst));
            state.held.insert(name.clone(), (token.clone(), now + lease));
            state.acquisitions += 1;

            Ok(Some(LockLease { name, token, lease }))
        })
    }

    fn release(&self, lease: &LockLease) -> BoxFuture<'_, Result<bool, LockError>> {
        let lease = lease.clone();
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let ours = state
                .held
                .get(&lease.name)
                .is_some_and(|(token, _)| *token == lease.token);
            if ours {
                state.held.remove(&lease.name);
            }
            Ok(ours)
        })
    }
}
