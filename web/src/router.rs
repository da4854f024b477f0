//! Route table.

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::middleware::correlation_id_layer;
use crate::state::AppState;

/// Build the application router.
///
/// | method | path | handler |
/// |---|---|---|
/// | `PUT` | `/voucher/seckill/:voucher_id` | [`handlers::purchase`] |
/// | `POST` | `/voucher/seckill` | [`handlers::publish_sale`] |
/// | `GET` | `/voucher-order/:order_id` | [`handlers::find_order`] |
/// | `GET` | `/health` | [`handlers::health_check`] |
/// | `GET` | `/ready` | [`handlers::readiness_check`] |
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/voucher/seckill/:voucher_id", put(handlers::purchase))
        .route("/voucher/seckill", post(handlers::publish_sale))
        .route("/voucher-order/:order_id", get(handlers::find_order))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}
