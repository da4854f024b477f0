//! Error types for web handlers.
//!
//! Bridges pipeline errors and business rejections to HTTP responses with a
//! `{code, message}` JSON body.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use seckill_core::SeckillError;
use seckill_runtime::Rejection;
use serde::Serialize;
use std::fmt;

/// Seconds a client should wait before retrying a transient failure.
pub const RETRY_AFTER_SECS: u64 = 1;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler() -> Result<Json<Data>, AppError> {
///     let order = find(id).await?.ok_or_else(|| AppError::not_found("Order", id))?;
///     Ok(Json(order))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: String,
    /// Seconds for the `Retry-After` header, if any
    retry_after: Option<u64>,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: String) -> Self {
        Self {
            status,
            message,
            code,
            retry_after: None,
            source: None,
        }
    }

    /// Create a new error with a source error.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Ask the client to retry after `secs` seconds.
    #[must_use]
    pub const fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(secs);
        self
    }

    /// HTTP status of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            message.into(),
            "BAD_REQUEST".to_string(),
        )
    }

    /// Create a 401 Unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            message.into(),
            "UNAUTHORIZED".to_string(),
        )
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} with id {id} not found"),
            "NOT_FOUND".to_string(),
        )
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message.into(),
            "INTERNAL_SERVER_ERROR".to_string(),
        )
    }

    /// Create a 503 Service Unavailable error with a `Retry-After` hint.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            message.into(),
            "SERVICE_UNAVAILABLE".to_string(),
        )
        .with_retry_after(RETRY_AFTER_SECS)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: String,
    /// Human-readable error message.
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                );
            } else {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    "Request failed"
                );
            }
        }

        let retry_after = self.retry_after;
        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        let mut response = (self.status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Business rejections: nothing changed, retrying the same request won't help.
impl From<Rejection> for AppError {
    fn from(rejection: Rejection) -> Self {
        let status = match rejection {
            Rejection::SaleNotFound => StatusCode::NOT_FOUND,
            Rejection::OutOfStock
            | Rejection::Duplicate
            | Rejection::SaleNotStarted
            | Rejection::SaleEnded => StatusCode::CONFLICT,
        };
        Self::new(
            status,
            rejection.message().to_string(),
            rejection.code().to_string(),
        )
    }
}

/// Infrastructure faults are transient (503 + `Retry-After`); validation
/// faults are the caller's (400).
impl From<SeckillError> for AppError {
    fn from(err: SeckillError) -> Self {
        if err.is_transient() {
            Self::unavailable("Service temporarily unavailable, please retry")
                .with_source(anyhow::Error::new(err))
        } else {
            Self::bad_request(err.to_string())
        }
    }
}

/// Convert `anyhow::Error` to `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seckill_core::queue::QueueError;

    #[test]
    fn test_error_display() {
        let err = AppError::bad_request("Invalid input");
        assert_eq!(err.to_string(), "[BAD_REQUEST] Invalid input");
    }

    #[test]
    fn test_not_found() {
        let err = AppError::not_found("Order", "123");
        assert_eq!(err.to_string(), "[NOT_FOUND] Order with id 123 not found");
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_rejections_map_to_business_statuses() {
        assert_eq!(AppError::from(Rejection::OutOfStock).status, StatusCode::CONFLICT);
        assert_eq!(AppError::from(Rejection::Duplicate).status, StatusCode::CONFLICT);
        assert_eq!(AppError::from(Rejection::SaleEnded).status, StatusCode::CONFLICT);
        assert_eq!(AppError::from(Rejection::SaleNotFound).status, StatusCode::NOT_FOUND);
        assert_eq!(AppError::from(Rejection::Duplicate).code, "DUPLICATE");
    }

    #[test]
    fn test_transient_failure_asks_for_retry() {
        let err = AppError::from(SeckillError::Queue(QueueError::Transport("down".into())));

        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.retry_after, Some(RETRY_AFTER_SECS));
        assert!(err.source.is_some());

        let response = err.into_response();
        assert_eq!(
            response.headers().get(header::RETRY_AFTER),
            Some(&HeaderValue::from(RETRY_AFTER_SECS))
        );
    }

    #[test]
    fn test_invalid_sale_is_bad_request() {
        let err = AppError::from(SeckillError::InvalidSale("stock must be positive".into()));

        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.retry_after, None);
    }
}
