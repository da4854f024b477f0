//! Custom Axum extractors.
//!
//! - `CorrelationId`: the request's correlation id
//! - `CurrentUser`: the buyer, as asserted by the upstream gateway

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use seckill_core::UserId;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::CORRELATION_ID_HEADER;

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "X-User-Id";

/// Correlation ID for request tracing.
///
/// Prefers the id stored by [`crate::middleware::correlation_id_layer`], then
/// the `X-Correlation-ID` header, and generates a new UUID v4 otherwise.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let correlation_id = parts
            .extensions
            .get::<Uuid>()
            .copied()
            .or_else(|| {
                parts
                    .headers
                    .get(CORRELATION_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| Uuid::parse_str(s).ok())
            })
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(correlation_id))
    }
}

/// The authenticated buyer.
///
/// Authentication happens upstream; the gateway forwards the user id in
/// `X-User-Id`. A missing or non-numeric header is rejected with 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::unauthorized("Missing X-User-Id header"))?;

        raw.to_str()
            .ok()
            .and_then(|s| s.trim().parse::<UserId>().ok())
            .map(Self)
            .ok_or_else(|| AppError::unauthorized("Invalid X-User-Id header"))
    }
}
