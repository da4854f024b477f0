//! Application state for Axum handlers.

use std::sync::Arc;

use seckill_core::health::HealthProbe;
use seckill_runtime::SeckillService;

/// Application state shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Purchase path, sale publishing and order lookup.
    pub service: SeckillService,
    /// Dependencies checked by the readiness endpoint.
    pub probes: Vec<Arc<dyn HealthProbe>>,
}

impl AppState {
    /// Create state with no readiness probes.
    #[must_use]
    pub const fn new(service: SeckillService) -> Self {
        Self {
            service,
            probes: Vec::new(),
        }
    }

    /// Add a readiness probe.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probes.push(probe);
        self
    }
}
