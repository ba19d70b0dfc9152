//! Error types for web handlers.
//!
//! [`AppError`] bridges orchestrator errors and HTTP responses. Clients get a
//! stable `code` and a short message; transport details stay in the logs.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use order_pipeline_core::order::ValidationError;
use order_pipeline_runtime::PlacementError;
use serde::Serialize;
use std::fmt;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler(State(state): State<AppState>) -> Result<Json<Vec<OrderRecord>>, AppError> {
///     let orders = state.orchestrator().orders_for(&principal).await?;
///     Ok(Json(orders))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: &'static str,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>, code: &'static str) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            source: None,
        }
    }

    /// Create a new error with a source error.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// 400 for requests that fail validation.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "VALIDATION_ERROR")
    }

    /// Create a 401 Unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message, "UNAUTHORIZED")
    }

    /// Create a 403 Forbidden error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message, "FORBIDDEN")
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message,
            "INTERNAL_SERVER_ERROR",
        )
    }

    /// HTTP status of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Stable error code sent to the client.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
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
struct ErrorResponse<'a> {
    /// Error code (for client error handling).
    code: &'a str,
    /// Human-readable error message.
    message: &'a str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                ),
                None => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    "Request failed"
                ),
            }
        } else {
            tracing::debug!(status = %self.status, code = self.code, "Request refused");
        }

        let body = ErrorResponse {
            code: self.code,
            message: &self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<PlacementError> for AppError {
    fn from(error: PlacementError) -> Self {
        match &error {
            PlacementError::Rejected(reason) => Self::validation(reason.to_string()),
            PlacementError::UpstreamRejected { status } => {
                let status = StatusCode::from_u16(*status)
                    .ok()
                    .filter(|s| s.is_client_error() || s.is_server_error())
                    .unwrap_or(StatusCode::BAD_GATEWAY);
                Self::new(status, "Book not found", "UPSTREAM_REJECTED")
            },
            PlacementError::UpstreamUnavailable(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "Catalog service unavailable",
                "UPSTREAM_UNAVAILABLE",
            ),
            PlacementError::RecordingFailed(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to record order",
                "RECORDING_FAILED",
            ),
            PlacementError::LedgerUnavailable(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read orders",
                "LEDGER_UNAVAILABLE",
            ),
            PlacementError::Forbidden(_) => Self::forbidden("Admin role required"),
        }
        .with_source(anyhow::Error::new(error))
    }
}

impl From<ValidationError> for AppError {
    fn from(error: ValidationError) -> Self {
        PlacementError::Rejected(error).into()
    }
}

/// Convert `anyhow::Error` to `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}
