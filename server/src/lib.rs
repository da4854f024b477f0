//! # Seckill Server
//!
//! Wires the Redis and `PostgreSQL` collaborators into the purchase service,
//! the HTTP router and the materializer pool, and runs them until shutdown.

pub mod bootstrap;
pub mod config;
pub mod lifecycle;

pub use bootstrap::ResourceManager;
pub use config::Config;
pub use lifecycle::Application;
