//! Axum HTTP surface for the order pipeline.
//!
//! Handlers stay thin: extract the trusted principal and the body, call the
//! [`OrderOrchestrator`](order_pipeline_runtime::OrderOrchestrator), map the
//! outcome to a response.
//!
//! # Request Flow
//!
//! 1. **Correlation ID** is taken from `X-Correlation-ID` or generated
//! 2. **Principal** is read from the gateway's trusted headers (401 if absent)
//! 3. **Body** is parsed (400 `VALIDATION_ERROR` if malformed)
//! 4. **Orchestrator** resolves, records and publishes
//! 5. **Outcome** maps to 200, 202 or an [`AppError`]
//!
//! # Example
//!
//! ```ignore
//! use order_pipeline_web::{AppState, order_routes};
//!
//! let app = order_routes(AppState::new(orchestrator));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8081").await?;
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::{AuthenticatedPrincipal, CorrelationId, ROLES_HEADER, USER_HEADER};
pub use middleware::{CORRELATION_ID_HEADER, correlation_id_layer};
pub use router::{metrics_routes, order_routes};
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
