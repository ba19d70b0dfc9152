//! Route table for the order service.

use crate::handlers::{
    health_check, list_all_orders, list_orders, metrics_endpoint, place_order, readiness,
};
use crate::middleware::correlation_id_layer;
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build the order service router.
///
/// | Route | Handler |
/// |---|---|
/// | `POST /order` | [`place_order`] |
/// | `GET /orders` | [`list_orders`] |
/// | `GET /orders/all` | [`list_all_orders`] |
/// | `GET /health` | [`health_check`] |
/// | `GET /health/ready` | [`readiness`] |
///
/// `/metrics` lives on its own listener, see [`metrics_routes`].
pub fn order_routes(state: AppState) -> Router {
    Router::new()
        .route("/order", post(place_order))
        .route("/orders", get(list_orders))
        .route("/orders/all", get(list_all_orders))
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness))
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}

/// Router for the dedicated metrics listener: `GET /metrics` and nothing else.
///
/// Answers 404 when `state` has no started metrics server.
pub fn metrics_routes(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
}
