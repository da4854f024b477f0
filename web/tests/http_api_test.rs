//! HTTP API tests over the in-memory pipeline.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, Request, StatusCode};
use axum_test::TestServer;
use chrono::TimeDelta;
use seckill_core::environment::Clock;
use seckill_core::{OrderId, UserId, VoucherId};
use seckill_testing::InMemoryPipeline;
use seckill_web::handlers::seckill::{OrderView, PurchaseResponse};
use seckill_web::{router, AppState, CORRELATION_ID_HEADER};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const VOUCHER: VoucherId = VoucherId(3);

fn user_header(user: i64) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("x-user-id"),
        HeaderValue::from_str(&user.to_string()).unwrap(),
    )
}

fn app(pipeline: &InMemoryPipeline) -> axum::Router {
    router(
        AppState::new(pipeline.service.clone()).with_probe(Arc::new(pipeline.orders.clone())),
    )
}

fn server(pipeline: &InMemoryPipeline) -> TestServer {
    TestServer::new(app(pipeline)).expect("test server should start")
}

#[tokio::test]
async fn purchase_returns_order_id_as_string() {
    let pipeline = InMemoryPipeline::new();
    pipeline.publish(VOUCHER, 1).await;
    let server = server(&pipeline);

    let (name, value) = user_header(7);
    let response = server.put("/voucher/seckill/3").add_header(name, value).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: PurchaseResponse = response.json();
    let order_id: OrderId = body.order_id.parse().unwrap();
    assert_eq!(pipeline.ledger.marker(VOUCHER, UserId(7)), Some(order_id));
}

#[tokio::test]
async fn second_purchase_is_a_conflict() {
    let pipeline = InMemoryPipeline::new();
    pipeline.publish(VOUCHER, 5).await;
    let server = server(&pipeline);

    let (name, value) = user_header(7);
    server
        .put("/voucher/seckill/3")
        .add_header(name.clone(), value.clone())
        .await;
    let response = server.put("/voucher/seckill/3").add_header(name, value).await;

    assert_eq!(response.status_code(), StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["code"], "DUPLICATE");
}

#[tokio::test]
async fn sold_out_is_a_conflict() {
    let pipeline = InMemoryPipeline::new();
    pipeline.publish(VOUCHER, 1).await;
    let server = server(&pipeline);

    let (name, value) = user_header(1);
    server.put("/voucher/seckill/3").add_header(name, value).await;
    let (name, value) = user_header(2);
    let response = server.put("/voucher/seckill/3").add_header(name, value).await;

    assert_eq!(response.status_code(), StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["code"], "OUT_OF_STOCK");
}

#[tokio::test]
async fn unknown_voucher_is_not_found() {
    let pipeline = InMemoryPipeline::new();
    let server = server(&pipeline);

    let (name, value) = user_header(7);
    let response = server.put("/voucher/seckill/99").add_header(name, value).await;

    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["code"], "SALE_NOT_FOUND");
}

#[tokio::test]
async fn closed_sale_is_a_conflict() {
    let pipeline = InMemoryPipeline::new();
    let sale = pipeline.publish(VOUCHER, 5).await;
    pipeline.clock.set(sale.end_time + TimeDelta::minutes(1));
    let server = server(&pipeline);

    let (name, value) = user_header(7);
    let response = server.put("/voucher/seckill/3").add_header(name, value).await;

    assert_eq!(response.status_code(), StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["code"], "SALE_ENDED");
}

#[tokio::test]
async fn missing_user_is_unauthorized() {
    let pipeline = InMemoryPipeline::new();
    pipeline.publish(VOUCHER, 5).await;
    let server = server(&pipeline);

    let response = server.put("/voucher/seckill/3").await;

    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(pipeline.ledger.stock(VOUCHER), Some(5));
}

#[tokio::test]
async fn infrastructure_failure_is_retryable() {
    seckill_testing::init_test_tracing();
    let pipeline = InMemoryPipeline::new();
    pipeline.publish(VOUCHER, 5).await;
    pipeline.ledger.fail_next_admissions(1);

    let request = Request::builder()
        .method("PUT")
        .uri("/voucher/seckill/3")
        .header("X-User-Id", "7")
        .body(Body::empty())
        .unwrap();
    let response = app(&pipeline).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    assert!(response.headers().contains_key(CORRELATION_ID_HEADER));
}

#[tokio::test]
async fn publish_then_buy() {
    let pipeline = InMemoryPipeline::new();
    let server = server(&pipeline);
    let now = pipeline.clock.now();

    let response = server
        .post("/voucher/seckill")
        .json(&json!({
            "voucherId": 8,
            "stock": 2,
            "beginTime": (now - TimeDelta::minutes(5)).to_rfc3339(),
            "endTime": (now + TimeDelta::minutes(5)).to_rfc3339(),
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::CREATED);
    assert_eq!(pipeline.ledger.stock(VoucherId(8)), Some(2));
    assert!(pipeline.orders.sale(VoucherId(8)).is_some());

    let (name, value) = user_header(7);
    let response = server.put("/voucher/seckill/8").add_header(name, value).await;
    assert_eq!(response.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn invalid_sale_is_bad_request() {
    let pipeline = InMemoryPipeline::new();
    let server = server(&pipeline);
    let now = pipeline.clock.now();

    let response = server
        .post("/voucher/seckill")
        .json(&json!({
            "voucherId": 8,
            "stock": 0,
            "beginTime": now.to_rfc3339(),
            "endTime": (now + TimeDelta::minutes(5)).to_rfc3339(),
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(pipeline.orders.sale(VoucherId(8)), None);
}

#[tokio::test]
async fn order_lookup_is_not_found_until_materialized() {
    let pipeline = InMemoryPipeline::new();
    pipeline.publish(VOUCHER, 1).await;
    let server = server(&pipeline);

    let (name, value) = user_header(7);
    let body: PurchaseResponse = server
        .put("/voucher/seckill/3")
        .add_header(name, value)
        .await
        .json();
    let path = format!("/voucher-order/{}", body.order_id);

    let response = server.get(&path).await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    pipeline.drain().await;

    let response = server.get(&path).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let order: OrderView = response.json();
    assert_eq!(order.order_id, body.order_id);
    assert_eq!(order.user_id, 7);
    assert_eq!(order.voucher_id, VOUCHER.value());
}

#[tokio::test]
async fn health_is_always_ok() {
    let pipeline = InMemoryPipeline::new();
    let server = server(&pipeline);

    let response = server.get("/health").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.text(), "ok");
}

#[tokio::test]
async fn readiness_reflects_probes() {
    let pipeline = InMemoryPipeline::new();
    let server = server(&pipeline);

    let response = server.get("/ready").await;
    assert_eq!(response.status_code(), StatusCode::OK);

    pipeline.orders.fail_next_pings(1);
    let response = server.get("/ready").await;
    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["status"], "unavailable");
    assert_eq!(body["components"][0]["healthy"], false);
}
