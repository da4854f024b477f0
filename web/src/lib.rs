//! HTTP surface of the seckill pipeline.
//!
//! # Request Flow
//!
//! 1. **Correlation id** is attached (or generated) by the middleware
//! 2. **Extractors** resolve the buyer (`X-User-Id`) and path parameters
//! 3. **Handler** calls [`seckill_runtime::SeckillService`]
//! 4. **Result** maps to JSON: business rejections become 404/409, transient
//!    infrastructure failures become 503 with `Retry-After`
//!
//! # Example
//!
//! ```ignore
//! use seckill_web::{router, AppState};
//!
//! let app = router(AppState::new(service).with_probe(redis_probe));
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::{CorrelationId, CurrentUser, USER_ID_HEADER};
pub use middleware::{correlation_id_layer, CORRELATION_ID_HEADER};
pub use router::router;
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
