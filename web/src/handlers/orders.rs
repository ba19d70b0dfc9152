//! Order placement and listing handlers.

use crate::error::AppError;
use crate::extractors::{AuthenticatedPrincipal, CorrelationId};
use crate::state::AppState;
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use order_pipeline_core::order::{OrderRecord, OrderRequest, PlacementReceipt, ValidationError};
use order_pipeline_runtime::PlacementOutcome;
use order_pipeline_runtime::metrics::ORDERS_REJECTED;
use serde::Serialize;

/// Body of a 202 response: recorded, notification still pending.
#[derive(Debug, Serialize)]
struct DegradedReceipt<'a> {
    #[serde(flatten)]
    receipt: &'a PlacementReceipt,
    notification: &'static str,
    code: &'static str,
}

/// Place an order for the authenticated caller.
///
/// # Endpoint
///
/// ```text
/// POST /order
/// {"book_id": "b1"}
/// ```
///
/// Answers 200 with the receipt once the event is published, or 202 with
/// `"notification": "pending_retry"` when the order is recorded but the event
/// waits in the republish queue.
///
/// # Errors
///
/// Malformed bodies are 400 `VALIDATION_ERROR`; orchestrator failures map
/// through [`AppError`].
pub async fn place_order(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    correlation_id: CorrelationId,
    body: Result<Json<OrderRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = body.map_err(|rejection| {
        metrics::counter!(ORDERS_REJECTED, "reason" => "validation").increment(1);
        AppError::from(ValidationError::MalformedBody(rejection.body_text()))
    })?;

    tracing::debug!(%correlation_id, username = %principal.username, "Placing order");

    let outcome = state.orchestrator().place(&principal, request).await?;
    let response = match &outcome {
        PlacementOutcome::Completed(receipt) => (StatusCode::OK, Json(receipt)).into_response(),
        PlacementOutcome::Degraded { receipt, reason } => {
            tracing::warn!(
                %correlation_id,
                order_id = %receipt.order_id,
                %reason,
                "Order recorded, notification pending retry"
            );
            let body = DegradedReceipt {
                receipt,
                notification: "pending_retry",
                code: "PUBLISH_DEGRADED",
            };
            (StatusCode::ACCEPTED, Json(body)).into_response()
        },
    };
    Ok(response)
}

/// Orders placed by the authenticated caller.
///
/// # Endpoint
///
/// ```text
/// GET /orders
/// ```
///
/// # Errors
///
/// 500 `LEDGER_UNAVAILABLE` if the ledger cannot be read.
pub async fn list_orders(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<Json<Vec<OrderRecord>>, AppError> {
    Ok(Json(state.orchestrator().orders_for(&principal).await?))
}

/// Every order in the ledger; admin role required.
///
/// # Endpoint
///
/// ```text
/// GET /orders/all
/// ```
///
/// # Errors
///
/// 403 `FORBIDDEN` without the admin role.
pub async fn list_all_orders(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> Result<Json<Vec<OrderRecord>>, AppError> {
    Ok(Json(state.orchestrator().all_orders(&principal).await?))
}
