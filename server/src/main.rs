//! Seckill server.
//!
//! ```bash
//! docker compose up -d   # Redis + PostgreSQL
//! cargo run --bin seckill-server
//! ```

use seckill_server::{Application, Config, ResourceManager};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,seckill=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!(
        http = %config.server_addr(),
        metrics = %config.metrics_addr(),
        stream = %config.seckill.order_stream,
        workers = config.seckill.materializer_workers,
        "Configuration loaded"
    );

    let resources = ResourceManager::from_config(&config).await?;
    let app = Application::build(&resources).await?;

    tracing::info!("Seckill server is running, press Ctrl+C to shut down");
    app.run().await
}
