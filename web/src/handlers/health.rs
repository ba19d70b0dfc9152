//! Health check endpoints.
//!
//! These endpoints are used by load balancers and monitoring systems
//! to verify service health.

use crate::state::AppState;
use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use order_pipeline_core::ledger::OrderLedger;
use order_pipeline_runtime::{HealthCheck, HealthReport};
use serde_json::{Value, json};

/// Simple health check endpoint (for basic liveness).
///
/// Does NOT check dependencies.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
///
/// # Response
///
/// ```json
/// { "status": "ok" }
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Readiness report over the ledger, the publisher session and the
/// republish backlog.
///
/// # Status Codes
///
/// - 200 OK: healthy or degraded
/// - 503 Service Unavailable: unhealthy
///
/// # Endpoint
///
/// ```text
/// GET /health/ready
/// ```
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let orchestrator = state.orchestrator();

    let ledger = match orchestrator.ledger().count().await {
        Ok(count) => HealthCheck::healthy("ledger").with_metadata("orders", count),
        Err(error) => HealthCheck::unhealthy("ledger", error.to_string()),
    };

    let publisher = orchestrator.publisher();
    let publisher = if publisher.is_connected() {
        HealthCheck::healthy("publisher")
    } else {
        HealthCheck::degraded("publisher", "No open broker session")
    }
    .with_metadata("queue", &publisher.binding().name);

    let queue = orchestrator.republish_queue();
    let backlog = queue.len();
    let republish = if backlog == 0 {
        HealthCheck::healthy("republish_queue")
    } else {
        HealthCheck::degraded("republish_queue", "Events waiting to be republished")
    }
    .with_metadata("backlog", backlog)
    .with_metadata("capacity", queue.max_size());

    let report = HealthReport::new(vec![ledger, publisher, republish]);
    let status = if report.is_unhealthy() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status, Json(report))
}

/// Prometheus text exposition.
///
/// # Endpoint
///
/// ```text
/// GET /metrics
/// ```
#[allow(clippy::unused_async)]
pub async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match state.metrics().and_then(|server| server.render()) {
        Some(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn liveness_is_ok() {
        let Json(body) = health_check().await;
        assert_eq!(body, json!({ "status": "ok" }));
    }
}
