//! HTTP-level tests for the order routes.
//!
//! Runs the full router over an in-memory ledger, a stub catalog and the
//! in-memory broker.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use axum::body::Bytes;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::{TestRequest, TestServer};
use order_pipeline_core::broker::QueueBinding;
use order_pipeline_core::catalog::CatalogError;
use order_pipeline_runtime::{EventPublisher, InMemoryLedger, OrderOrchestrator, RepublishQueue};
use order_pipeline_testing::{InMemoryBroker, SequentialIds, StubCatalog, test_clock};
use order_pipeline_web::{AppState, order_routes};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    server: TestServer,
    broker: InMemoryBroker,
    catalog: StubCatalog,
    republish: Arc<RepublishQueue>,
}

fn harness() -> Harness {
    order_pipeline_testing::init_test_tracing();
    let broker = InMemoryBroker::new();
    let catalog = StubCatalog::new()
        .with_product("b1", "Dune", "Herbert")
        .with_product("b2", "Emma", "Austen")
        .with_failure("down", CatalogError::Unavailable("connection refused".into()));
    let republish = Arc::new(RepublishQueue::new(100));
    let publisher = Arc::new(
        EventPublisher::new(Arc::new(broker.clone()), QueueBinding::order_events())
            .with_timeout(Duration::from_secs(1)),
    );

    let orchestrator = Arc::new(OrderOrchestrator::new(
        Arc::new(catalog.clone()),
        Arc::new(InMemoryLedger::new()),
        publisher,
        Arc::clone(&republish),
        Arc::new(test_clock()),
        Arc::new(SequentialIds::new()),
    ));

    let server = TestServer::new(order_routes(AppState::new(orchestrator))).unwrap();
    Harness {
        server,
        broker,
        catalog,
        republish,
    }
}

fn as_user(request: TestRequest, user: &'static str) -> TestRequest {
    request.add_header(
        HeaderName::from_static("x-authenticated-user"),
        HeaderValue::from_static(user),
    )
}

fn as_admin(request: TestRequest, user: &'static str) -> TestRequest {
    as_user(request, user).add_header(
        HeaderName::from_static("x-authenticated-roles"),
        HeaderValue::from_static("user,admin"),
    )
}

async fn place(h: &Harness, user: &'static str, book_id: &str) -> (StatusCode, Value) {
    let response = as_user(h.server.post("/order"), user)
        .json(&json!({ "book_id": book_id }))
        .await;
    (response.status_code(), response.json::<Value>())
}

// ============================================================================
// POST /order
// ============================================================================

#[tokio::test]
async fn placing_a_known_book_returns_the_receipt() {
    let h = harness();

    let (status, body) = place(&h, "alice", "b1").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order_id"], "ord_1");
    assert_eq!(body["message"], "Order placed for book: Dune by Herbert");
    assert_eq!(body["order"]["book_id"], "b1");
    assert_eq!(body["order"]["book_title"], "Dune");
    assert_eq!(body["order"]["username"], "alice");
    assert_eq!(body["order"]["status"], "completed");

    let events = h.broker.published_events("order_events");
    assert_eq!(events.len(), 1);
    assert!(events[0].message.contains("Dune"));
}

#[tokio::test]
async fn broker_outage_answers_202_and_queues_the_event() {
    let h = harness();
    h.broker.set_unreachable(true);

    let (status, body) = place(&h, "alice", "b1").await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["code"], "PUBLISH_DEGRADED");
    assert_eq!(body["notification"], "pending_retry");
    assert_eq!(body["order_id"], "ord_1");
    assert_eq!(body["order"]["book_author"], "Herbert");
    assert_eq!(h.republish.len(), 1);

    let response = as_user(h.server.get("/orders"), "alice").await;
    assert_eq!(response.json::<Value>().as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_body_is_a_validation_error() {
    let h = harness();

    let response = as_user(h.server.post("/order"), "alice")
        .bytes(Bytes::from_static(b"{not json"))
        .content_type("application/json")
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["code"], "VALIDATION_ERROR");
    assert_eq!(h.catalog.calls(), 0);
}

#[tokio::test]
async fn empty_book_id_is_rejected_before_the_catalog() {
    let h = harness();

    let (status, body) = place(&h, "alice", "  ").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(h.catalog.calls(), 0);
}

#[tokio::test]
async fn dot_segment_book_id_is_rejected_before_the_catalog() {
    let h = harness();

    for book_id in [".", ".."] {
        let (status, body) = place(&h, "alice", book_id).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{book_id}");
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }
    assert_eq!(h.catalog.calls(), 0);
}

#[tokio::test]
async fn unknown_book_passes_the_catalog_status_through() {
    let h = harness();

    let (status, body) = place(&h, "alice", "nope").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "UPSTREAM_REJECTED");
    assert!(h.broker.published("order_events").is_empty());

    let response = as_user(h.server.get("/orders"), "alice").await;
    assert_eq!(response.json::<Value>(), json!([]));
}

#[tokio::test]
async fn unreachable_catalog_is_503_without_details() {
    let h = harness();

    let (status, body) = place(&h, "alice", "down").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "UPSTREAM_UNAVAILABLE");
    assert!(!body["message"].as_str().unwrap().contains("refused"));
}

#[tokio::test]
async fn missing_principal_is_401() {
    let h = harness();

    let response = h.server.post("/order").json(&json!({ "book_id": "b1" })).await;

    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(h.catalog.calls(), 0);
}

#[tokio::test]
async fn correlation_id_is_echoed() {
    let h = harness();

    let response = as_user(h.server.post("/order"), "alice")
        .add_header(
            HeaderName::from_static("x-correlation-id"),
            HeaderValue::from_static("checkout-9"),
        )
        .json(&json!({ "book_id": "b1" }))
        .await;

    assert_eq!(
        response.headers().get("x-correlation-id").unwrap(),
        "checkout-9"
    );
}

// ============================================================================
// GET /orders, GET /orders/all
// ============================================================================

#[tokio::test]
async fn callers_see_only_their_own_orders() {
    let h = harness();
    place(&h, "alice", "b1").await;
    place(&h, "bob", "b2").await;
    place(&h, "alice", "b2").await;

    let response = as_user(h.server.get("/orders"), "alice").await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let orders = response.json::<Value>();
    let ids: Vec<&str> = orders
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["ord_1", "ord_3"]);
}

#[tokio::test]
async fn listing_all_orders_requires_admin() {
    let h = harness();
    place(&h, "alice", "b1").await;
    place(&h, "bob", "b2").await;

    let denied = as_user(h.server.get("/orders/all"), "alice").await;
    assert_eq!(denied.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(denied.json::<Value>()["code"], "FORBIDDEN");

    let allowed = as_admin(h.server.get("/orders/all"), "root").await;
    assert_eq!(allowed.status_code(), StatusCode::OK);
    assert_eq!(allowed.json::<Value>().as_array().unwrap().len(), 2);
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn liveness_does_not_need_a_principal() {
    let h = harness();

    let response = h.server.get("/health").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>(), json!({ "status": "ok" }));
}

#[tokio::test]
async fn readiness_reports_backlog_as_degraded() {
    let h = harness();
    h.broker.set_unreachable(true);
    place(&h, "alice", "b1").await;

    let response = h.server.get("/health/ready").await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let report = response.json::<Value>();
    assert_eq!(report["status"], "degraded");
    let backlog = report["checks"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["component"] == "republish_queue")
        .unwrap();
    assert_eq!(backlog["status"], "degraded");
    assert_eq!(backlog["details"]["backlog"], "1");
}

#[tokio::test]
async fn order_router_does_not_serve_metrics() {
    let h = harness();

    let response = h.server.get("/metrics").await;

    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}
