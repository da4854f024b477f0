//! HTTP request handlers.

pub mod health;
pub mod seckill;

pub use health::{health_check, readiness_check};
pub use seckill::{find_order, publish_sale, purchase};
