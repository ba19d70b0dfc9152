//! Application state for Axum handlers.

use order_pipeline_runtime::OrderOrchestrator;
use order_pipeline_runtime::metrics::MetricsServer;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Cheap to clone; everything behind it is reference counted.
#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<OrderOrchestrator>,
    metrics: Option<Arc<MetricsServer>>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub const fn new(orchestrator: Arc<OrderOrchestrator>) -> Self {
        Self {
            orchestrator,
            metrics: None,
        }
    }

    /// Render `/metrics` from `server`'s recorder (see [`metrics_routes`](crate::metrics_routes)).
    #[must_use]
    pub fn with_metrics(mut self, server: Arc<MetricsServer>) -> Self {
        self.metrics = Some(server);
        self
    }

    /// The orchestrator behind the order routes.
    #[must_use]
    pub const fn orchestrator(&self) -> &Arc<OrderOrchestrator> {
        &self.orchestrator
    }

    /// The metrics server, if one was attached.
    #[must_use]
    pub const fn metrics(&self) -> Option<&Arc<MetricsServer>> {
        self.metrics.as_ref()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("orchestrator", &self.orchestrator)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}
