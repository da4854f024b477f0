//! Seckill endpoints: purchase, sale publishing, order lookup.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use seckill_core::sale::SeckillSale;
use seckill_core::{OrderId, OrderRecord, VoucherId};
use seckill_runtime::PurchaseDecision;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::extractors::{CorrelationId, CurrentUser};
use crate::state::AppState;
use crate::WebResult;

/// Successful purchase.
///
/// The order id is a string: it does not fit a JSON number losslessly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseResponse {
    /// Order id the record will be created under.
    pub order_id: String,
}

/// A materialized order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    /// Order id, as a string.
    pub order_id: String,
    /// Buyer.
    pub user_id: i64,
    /// Voucher bought.
    pub voucher_id: i64,
    /// When the record was written.
    pub created_at: DateTime<Utc>,
}

impl From<OrderRecord> for OrderView {
    fn from(record: OrderRecord) -> Self {
        Self {
            order_id: record.order_id.to_string(),
            user_id: record.user_id.value(),
            voucher_id: record.voucher_id.value(),
            created_at: record.created_at,
        }
    }
}

/// Buy one unit of a voucher.
///
/// ```text
/// PUT /voucher/seckill/{voucherId}
/// X-User-Id: 42
///
/// 200 {"orderId": "1234567890"}
/// 409 {"code": "OUT_OF_STOCK" | "DUPLICATE" | "SALE_NOT_STARTED" | "SALE_ENDED", ...}
/// 404 {"code": "SALE_NOT_FOUND", ...}
/// 503 + Retry-After on infrastructure failure
/// ```
///
/// Returns as soon as the purchase is admitted; the order record is written
/// asynchronously.
pub async fn purchase(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    CorrelationId(correlation_id): CorrelationId,
    Path(voucher_id): Path<i64>,
) -> WebResult<Json<PurchaseResponse>> {
    let voucher_id = VoucherId(voucher_id);

    match state.service.attempt_purchase(voucher_id, user_id).await? {
        PurchaseDecision::Accepted(order_id) => {
            tracing::info!(
                %correlation_id,
                %order_id,
                %user_id,
                %voucher_id,
                "Purchase admitted"
            );
            Ok(Json(PurchaseResponse {
                order_id: order_id.to_string(),
            }))
        }
        PurchaseDecision::Rejected(rejection) => {
            tracing::debug!(
                %correlation_id,
                %user_id,
                %voucher_id,
                code = rejection.code(),
                "Purchase rejected"
            );
            Err(rejection.into())
        }
    }
}

/// Put a voucher on flash sale.
///
/// ```text
/// POST /voucher/seckill
/// {"voucherId": 1, "stock": 100, "beginTime": "...", "endTime": "..."}
/// ```
pub async fn publish_sale(
    State(state): State<AppState>,
    Json(sale): Json<SeckillSale>,
) -> WebResult<(StatusCode, Json<SeckillSale>)> {
    state.service.publish_sale(&sale).await?;
    Ok((StatusCode::CREATED, Json(sale)))
}

/// Look up an order; 404 while it is still being materialized.
///
/// ```text
/// GET /voucher-order/{orderId}
/// ```
pub async fn find_order(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
) -> WebResult<Json<OrderView>> {
    let order_id = OrderId(order_id);
    state
        .service
        .find_order(order_id)
        .await?
        .map(|record| Json(OrderView::from(record)))
        .ok_or_else(|| AppError::not_found("Order", order_id))
}
