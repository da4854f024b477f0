//! Application lifecycle and graceful shutdown.
//!
//! When a shutdown signal is received (Ctrl+C or SIGTERM):
//! 1. HTTP server stops accepting new connections
//! 2. Shutdown is broadcast to every materializer worker
//! 3. Workers finish the intent in hand and stop (bounded by `SHUTDOWN_TIMEOUT`)
//! 4. Clean exit
//!
//! Intents a worker had read but not acknowledged stay pending and are
//! replayed by the worker with the same name at the next start.

use std::sync::Arc;

use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use seckill_runtime::metrics::MetricsServer;
use seckill_runtime::{Materializer, MaterializerPool};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::bootstrap::ResourceManager;
use crate::config::Config;

/// Running application: HTTP server, metrics endpoint and worker pool.
pub struct Application {
    /// TCP listener for HTTP server
    listener: TcpListener,

    /// Axum router with all HTTP routes
    app: Router,

    /// Metrics listener and its recorder handle
    metrics: Option<(TcpListener, PrometheusHandle)>,

    /// Worker template for the pool
    materializer: Materializer,

    /// Shutdown signal broadcaster
    shutdown_tx: broadcast::Sender<()>,

    /// Application configuration
    config: Arc<Config>,
}

impl Application {
    /// Bind listeners, install the metrics recorder and wire the pipeline.
    ///
    /// # Errors
    ///
    /// Returns error if a listener cannot bind or the recorder cannot be installed.
    pub async fn build(resources: &ResourceManager) -> Result<Self, Box<dyn std::error::Error>> {
        let config = Arc::clone(&resources.config);

        let metrics_listener = TcpListener::bind(config.metrics_addr()).await?;
        let mut metrics_server = MetricsServer::new(metrics_listener.local_addr()?);
        metrics_server.start()?;
        let metrics = metrics_server
            .handle()
            .map(|handle| (metrics_listener, handle));

        let listener = TcpListener::bind(config.server_addr()).await?;
        let app = seckill_web::router(resources.app_state());
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            listener,
            app,
            metrics,
            materializer: resources.materializer(),
            shutdown_tx,
            config,
        })
    }

    /// Run until a shutdown signal, then stop everything in order.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP server fails.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let pool = MaterializerPool::spawn(
            &self.materializer,
            self.config.seckill.materializer_workers,
            &self.config.seckill.consumer_prefix,
            &self.shutdown_tx,
        );

        if let Some((listener, handle)) = self.metrics {
            spawn_metrics_endpoint(listener, handle, self.shutdown_tx.subscribe());
        }

        info!(address = %self.listener.local_addr()?, "HTTP server listening for requests");
        axum::serve(self.listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("HTTP server stopped, initiating graceful shutdown...");
        let _ = self.shutdown_tx.send(());

        let unclean = pool.join(self.config.shutdown_timeout()).await;
        if unclean > 0 {
            warn!(unclean, "Some workers did not stop cleanly; their intents stay pending");
        }

        info!("Graceful shutdown complete");
        Ok(())
    }
}

/// Serve `GET /metrics` until shutdown.
fn spawn_metrics_endpoint(
    listener: TcpListener,
    handle: PrometheusHandle,
    mut shutdown: broadcast::Receiver<()>,
) {
    let app = Router::new().route("/metrics", get(move || async move { handle.render() }));

    tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await;
        if let Err(e) = served {
            error!(error = %e, "Metrics endpoint failed");
        }
    });
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
