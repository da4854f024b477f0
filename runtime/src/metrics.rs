//! Prometheus metrics for the purchase pipeline.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `seckill_admissions_total{outcome}` - purchase attempts by outcome
//!   (`accepted`, `out_of_stock`, `duplicate`, `sale_not_found`,
//!   `sale_not_started`, `sale_ended`, `error`)
//! - `seckill_orders_materialized_total{result}` - materializer results
//!   (`created`, `already_exists`, `failed`)
//! - `seckill_materializer_recoveries_total` - failures that sent a worker to recovery
//! - `seckill_intents_dead_lettered_total` - undecodable intents parked
//! - `seckill_enqueue_failures_total` - granted intents that could not be enqueued
//!
//! ## Histograms
//! - `seckill_admission_duration_seconds` - end-to-end purchase attempt latency
//!
//! # Example
//!
//! ```rust,no_run
//! use seckill_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! let body = server.render();
//! # let _ = body;
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder plus the address its scrape endpoint is served on.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a server for `addr` (e.g. `0.0.0.0:9090`).
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Address the scrape endpoint should be served on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Describe all metrics and install the global recorder.
    ///
    /// A recorder installed earlier (tests) is tolerated with a warning; the
    /// handle is then `None`.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// The recorder handle, if this server installed it.
    #[must_use]
    pub fn handle(&self) -> Option<PrometheusHandle> {
        self.handle.clone()
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!(
        "seckill_admissions_total",
        "Purchase attempts by outcome"
    );
    describe_histogram!(
        "seckill_admission_duration_seconds",
        "Time taken to decide a purchase attempt"
    );
    describe_counter!(
        "seckill_orders_materialized_total",
        "Order intents materialized, by result"
    );
    describe_counter!(
        "seckill_materializer_recoveries_total",
        "Failures that sent a materializer worker into recovery"
    );
    describe_counter!(
        "seckill_intents_dead_lettered_total",
        "Undecodable intents moved to the dead-letter stream"
    );
    describe_counter!(
        "seckill_enqueue_failures_total",
        "Granted admissions whose intent could not be enqueued"
    );
    describe_counter!(
        "seckill_stock_mismatches_total",
        "Orders persisted while the relational stock mirror had no unit left"
    );
}

/// Metric recorders for the pipeline.
pub struct SeckillMetrics;

impl SeckillMetrics {
    /// Record a decided purchase attempt.
    pub fn record_admission(outcome: &'static str, duration: Duration) {
        counter!("seckill_admissions_total", "outcome" => outcome).increment(1);
        histogram!("seckill_admission_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a materialization result.
    pub fn record_materialized(result: &'static str) {
        counter!("seckill_orders_materialized_total", "result" => result).increment(1);
    }

    /// Record a worker entering recovery after a failure.
    pub fn record_recovery() {
        counter!("seckill_materializer_recoveries_total").increment(1);
    }

    /// Record a dead-lettered intent.
    pub fn record_dead_letter() {
        counter!("seckill_intents_dead_lettered_total").increment(1);
    }

    /// Record an intent that could not be enqueued.
    pub fn record_enqueue_failure() {
        counter!("seckill_enqueue_failures_total").increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_server_creation() {
        let server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[test]
    fn test_metrics_server_render() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        server.start().unwrap();

        SeckillMetrics::record_admission("accepted", Duration::from_millis(1));
        SeckillMetrics::record_materialized("created");
        SeckillMetrics::record_recovery();
        counter!("seckill_stock_mismatches_total").increment(1);

        // Another test may have installed the recorder first
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("seckill_admissions_total"));
            assert!(rendered.contains("seckill_orders_materialized_total"));
            assert!(rendered.contains("# HELP seckill_stock_mismatches_total"));
        }
    }
}
