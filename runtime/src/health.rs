//! Health reporting for readiness probes.
//!
//! Each component contributes a [`HealthCheck`]; a [`HealthReport`] folds them
//! into one status, the worst of its parts.
//!
//! ```json
//! {
//!   "status": "degraded",
//!   "checks": [
//!     { "component": "ledger", "status": "healthy", "details": { "orders": "4" } },
//!     { "component": "republish_queue", "status": "degraded",
//!       "message": "Events waiting to be republished", "details": { "backlog": "1" } }
//!   ],
//!   "timestamp": "2024-01-01T00:00:00Z"
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Component status, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Fully operational
    Healthy,
    /// Serving, but something needs attention (e.g. a republish backlog)
    Degraded,
    /// Not serving
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        })
    }
}

/// One component's contribution to a [`HealthReport`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Component name (`ledger`, `publisher`, `republish_queue`, ...)
    pub component: String,
    /// Status of the component
    pub status: HealthStatus,
    /// Why the component is not healthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Figures worth showing an operator (sizes, queue names)
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl HealthCheck {
    fn with_status(component: impl Into<String>, status: HealthStatus, message: Option<String>) -> Self {
        Self {
            component: component.into(),
            status,
            message,
            details: BTreeMap::new(),
        }
    }

    /// A healthy component.
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self::with_status(component, HealthStatus::Healthy, None)
    }

    /// A component that serves but needs attention.
    #[must_use]
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(component, HealthStatus::Degraded, Some(message.into()))
    }

    /// A component that cannot serve.
    #[must_use]
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(component, HealthStatus::Unhealthy, Some(message.into()))
    }

    /// Attach a detail; a repeated key keeps the last value.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.insert(key.into(), value.to_string());
        self
    }
}

/// Readiness report over every component.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Worst status among the checks
    pub status: HealthStatus,
    /// Individual checks, in the order given
    pub checks: Vec<HealthCheck>,
    /// When the report was assembled
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    /// Fold `checks` into a report. No checks means healthy.
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|check| check.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            checks,
            timestamp: Utc::now(),
        }
    }

    /// Every check is healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// Whether the report should fail a readiness probe.
    #[must_use]
    pub fn is_unhealthy(&self) -> bool {
        self.status == HealthStatus::Unhealthy
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn report_takes_worst_status() {
        let report = HealthReport::new(vec![
            HealthCheck::healthy("ledger"),
            HealthCheck::degraded("republish_queue", "3 events pending"),
        ]);
        assert_eq!(report.status, HealthStatus::Degraded);

        let report = HealthReport::new(vec![
            HealthCheck::unhealthy("ledger", "poisoned"),
            HealthCheck::degraded("republish_queue", "pending"),
        ]);
        assert!(report.is_unhealthy());
    }

    #[test]
    fn empty_report_is_healthy() {
        assert!(HealthReport::new(Vec::new()).is_healthy());
    }

    #[test]
    fn repeated_detail_keeps_last_value() {
        let check = HealthCheck::healthy("publisher")
            .with_metadata("queue", "a")
            .with_metadata("queue", "order_events");
        assert_eq!(check.details.len(), 1);
        assert_eq!(check.details["queue"], "order_events");
    }

    #[test]
    fn report_serializes_lowercase_status_and_details() {
        let report =
            HealthReport::new(vec![HealthCheck::healthy("ledger").with_metadata("orders", 4)]);
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["status"], "healthy");
        assert_eq!(json["checks"][0]["component"], "ledger");
        assert_eq!(json["checks"][0]["details"]["orders"], "4");
        assert!(json["checks"][0].get("message").is_none());
    }
}
