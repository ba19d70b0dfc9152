//! Order placement workflow.
//!
//! Each placement walks a fixed sequence of states:
//!
//! ```text
//! Validating ──► Resolving ──► Recording ──► Publishing ──► Completed
//!     │              │             │              │
//!     ▼              ▼             ▼              ▼
//!  Rejected   UpstreamUnavailable  RecordingFailed  Degraded
//!             UpstreamRejected                      (recorded, event queued)
//! ```
//!
//! Later failures never undo earlier steps: once an order is recorded it stays
//! recorded, and a failed publish only degrades the result.

use crate::metrics::{CATALOG_LOOKUP_DURATION, ORDERS_DEGRADED, ORDERS_PLACED, ORDERS_REJECTED};
use crate::publisher::EventPublisher;
use crate::republish::RepublishQueue;
use order_pipeline_core::catalog::{CatalogClient, CatalogError};
use order_pipeline_core::environment::{Clock, IdGenerator};
use order_pipeline_core::event::OrderEvent;
use order_pipeline_core::ledger::{LedgerError, OrderLedger};
use order_pipeline_core::order::{
    OrderRecord, OrderRequest, PlacementReceipt, Principal, ProductRecord, ValidationError,
};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::Instrument;

/// Why a placement or query did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlacementError {
    /// The request was malformed; nothing happened
    #[error("Invalid order request: {0}")]
    Rejected(#[from] ValidationError),

    /// The catalog could not be reached or answered garbage; nothing happened
    #[error("Catalog unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The catalog refused the product; nothing happened
    #[error("Catalog rejected the product with status {status}")]
    UpstreamRejected {
        /// Status the catalog answered with
        status: u16,
    },

    /// The ledger refused the record; no event was published
    #[error("Failed to record order: {0}")]
    RecordingFailed(String),

    /// The ledger could not be read
    #[error("Failed to read orders: {0}")]
    LedgerUnavailable(String),

    /// The principal lacks the role for this operation
    #[error("Principal '{0}' is not allowed to list all orders")]
    Forbidden(String),
}

impl From<CatalogError> for PlacementError {
    fn from(error: CatalogError) -> Self {
        match error {
            CatalogError::NotFound { status } => Self::UpstreamRejected { status },
            CatalogError::Unavailable(reason) | CatalogError::InvalidResponse(reason) => {
                Self::UpstreamUnavailable(reason)
            },
        }
    }
}

/// Successful placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementOutcome {
    /// Recorded and published
    Completed(PlacementReceipt),
    /// Recorded; the event is waiting in the republish queue
    Degraded {
        /// The placement receipt
        receipt: PlacementReceipt,
        /// Why publishing failed
        reason: String,
    },
}

impl PlacementOutcome {
    /// The receipt, whichever way the notification leg went.
    #[must_use]
    pub const fn receipt(&self) -> &PlacementReceipt {
        match self {
            Self::Completed(receipt) | Self::Degraded { receipt, .. } => receipt,
        }
    }

    /// Whether the notification leg failed.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// Where a placement currently is.
#[derive(Debug)]
enum PlacementState {
    Validating(OrderRequest),
    Resolving(String),
    Recording(ProductRecord),
    Publishing(OrderRecord),
    Completed(PlacementOutcome),
}

impl PlacementState {
    const fn name(&self) -> &'static str {
        match self {
            Self::Validating(_) => "validating",
            Self::Resolving(_) => "resolving",
            Self::Recording(_) => "recording",
            Self::Publishing(_) => "publishing",
            Self::Completed(_) => "completed",
        }
    }
}

/// Coordinates catalog, ledger and publisher for each placement.
pub struct OrderOrchestrator {
    catalog: Arc<dyn CatalogClient>,
    ledger: Arc<dyn OrderLedger>,
    publisher: Arc<EventPublisher>,
    republish: Arc<RepublishQueue>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl OrderOrchestrator {
    /// Wires the orchestrator to its collaborators.
    #[must_use]
    pub fn new(
        catalog: Arc<dyn CatalogClient>,
        ledger: Arc<dyn OrderLedger>,
        publisher: Arc<EventPublisher>,
        republish: Arc<RepublishQueue>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            catalog,
            ledger,
            publisher,
            republish,
            clock,
            ids,
        }
    }

    /// The ledger backing this orchestrator.
    #[must_use]
    pub const fn ledger(&self) -> &Arc<dyn OrderLedger> {
        &self.ledger
    }

    /// The publisher used for order events.
    #[must_use]
    pub const fn publisher(&self) -> &Arc<EventPublisher> {
        &self.publisher
    }

    /// The backlog of events awaiting republish.
    #[must_use]
    pub const fn republish_queue(&self) -> &Arc<RepublishQueue> {
        &self.republish
    }

    /// Place an order for `principal`.
    ///
    /// Identical requests are never deduplicated: each call that gets past
    /// resolution records a new order under a fresh id.
    ///
    /// # Errors
    ///
    /// - [`PlacementError::Rejected`] for an empty product reference
    /// - [`PlacementError::UpstreamRejected`] if the catalog does not know the product
    /// - [`PlacementError::UpstreamUnavailable`] if the catalog cannot answer
    /// - [`PlacementError::RecordingFailed`] if the ledger refuses the record
    pub async fn place(
        &self,
        principal: &Principal,
        request: OrderRequest,
    ) -> Result<PlacementOutcome, PlacementError> {
        let span = tracing::info_span!(
            "order_placement",
            username = %principal.username,
            book_id = %request.book_id,
        );

        async move {
            let mut state = PlacementState::Validating(request);
            loop {
                let from = state.name();
                state = match self.step(principal, state).await {
                    Ok(PlacementState::Completed(outcome)) => {
                        let receipt = outcome.receipt();
                        if outcome.is_degraded() {
                            metrics::counter!(ORDERS_DEGRADED).increment(1);
                        } else {
                            metrics::counter!(ORDERS_PLACED).increment(1);
                        }
                        tracing::info!(
                            order_id = %receipt.order_id,
                            degraded = outcome.is_degraded(),
                            "Order placed"
                        );
                        return Ok(outcome);
                    },
                    Ok(next) => {
                        tracing::debug!(from, to = next.name(), "Placement advanced");
                        next
                    },
                    Err(error) => {
                        metrics::counter!(ORDERS_REJECTED, "reason" => reason_label(&error))
                            .increment(1);
                        tracing::warn!(state = from, %error, "Placement failed");
                        return Err(error);
                    },
                };
            }
        }
        .instrument(span)
        .await
    }

    async fn step(
        &self,
        principal: &Principal,
        state: PlacementState,
    ) -> Result<PlacementState, PlacementError> {
        match state {
            PlacementState::Validating(request) => {
                let product_id = request.validate()?;
                Ok(PlacementState::Resolving(product_id.to_string()))
            },
            PlacementState::Resolving(product_id) => {
                let started = Instant::now();
                let result = self.catalog.fetch(&product_id).await;
                metrics::histogram!(CATALOG_LOOKUP_DURATION).record(started.elapsed().as_secs_f64());
                Ok(PlacementState::Recording(result?))
            },
            PlacementState::Recording(product) => {
                let placed_at = self.clock.now();
                let id = self.ids.next_order_id(placed_at);
                let record =
                    OrderRecord::from_product(id, &product, principal.username.clone(), placed_at);
                self.ledger
                    .append(record.clone())
                    .await
                    .map_err(|e| PlacementError::RecordingFailed(e.to_string()))?;
                Ok(PlacementState::Publishing(record))
            },
            PlacementState::Publishing(record) => {
                let event = OrderEvent::from_record(&record, self.clock.now());
                let receipt = PlacementReceipt::for_order(record);
                let outcome = match self.publisher.publish(&event).await {
                    Ok(()) => PlacementOutcome::Completed(receipt),
                    Err(error) => {
                        let reason = error.to_string();
                        self.republish.push(event, reason.clone());
                        PlacementOutcome::Degraded { receipt, reason }
                    },
                };
                Ok(PlacementState::Completed(outcome))
            },
            PlacementState::Completed(outcome) => Ok(PlacementState::Completed(outcome)),
        }
    }

    /// Orders owned by `principal`, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`PlacementError::LedgerUnavailable`] if the ledger cannot be read.
    pub async fn orders_for(&self, principal: &Principal) -> Result<Vec<OrderRecord>, PlacementError> {
        self.ledger
            .list_by_owner(&principal.username)
            .await
            .map_err(read_failed)
    }

    /// Every order in the ledger. Requires the admin role.
    ///
    /// # Errors
    ///
    /// - [`PlacementError::Forbidden`] if `principal` is not an admin
    /// - [`PlacementError::LedgerUnavailable`] if the ledger cannot be read
    pub async fn all_orders(&self, principal: &Principal) -> Result<Vec<OrderRecord>, PlacementError> {
        if !principal.is_admin() {
            tracing::warn!(username = %principal.username, "Denied ledger-wide order listing");
            return Err(PlacementError::Forbidden(principal.username.clone()));
        }
        self.ledger.list_all().await.map_err(read_failed)
    }
}

impl std::fmt::Debug for OrderOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderOrchestrator")
            .field("publisher", &self.publisher)
            .field("republish", &self.republish)
            .finish_non_exhaustive()
    }
}

fn read_failed(error: LedgerError) -> PlacementError {
    PlacementError::LedgerUnavailable(error.to_string())
}

const fn reason_label(error: &PlacementError) -> &'static str {
    match error {
        PlacementError::Rejected(_) => "validation",
        PlacementError::UpstreamUnavailable(_) => "upstream_unavailable",
        PlacementError::UpstreamRejected { .. } => "upstream_rejected",
        PlacementError::RecordingFailed(_) => "recording_failed",
        PlacementError::LedgerUnavailable(_) => "ledger_unavailable",
        PlacementError::Forbidden(_) => "forbidden",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use order_pipeline_core::broker::QueueBinding;
    use order_pipeline_core::ledger::LedgerFuture;
    use order_pipeline_testing::{InMemoryBroker, SequentialIds, StubCatalog, test_clock};

    struct Harness {
        orchestrator: OrderOrchestrator,
        broker: InMemoryBroker,
        catalog: StubCatalog,
        ledger: Arc<dyn OrderLedger>,
        republish: Arc<RepublishQueue>,
    }

    fn harness_with_ledger(ledger: Arc<dyn OrderLedger>) -> Harness {
        let broker = InMemoryBroker::new();
        let catalog = StubCatalog::new()
            .with_product("b1", "Dune", "Herbert")
            .with_failure("slow", CatalogError::Unavailable("timed out".into()))
            .with_failure("garbled", CatalogError::InvalidResponse("missing field `title`".into()))
            .with_failure("gone", CatalogError::NotFound { status: 410 });
        let publisher = Arc::new(EventPublisher::new(
            Arc::new(broker.clone()),
            QueueBinding::order_events(),
        ));
        let republish = Arc::new(RepublishQueue::new(100));
        let orchestrator = OrderOrchestrator::new(
            Arc::new(catalog.clone()),
            Arc::clone(&ledger),
            publisher,
            Arc::clone(&republish),
            Arc::new(test_clock()),
            Arc::new(SequentialIds::new()),
        );
        Harness {
            orchestrator,
            broker,
            catalog,
            ledger,
            republish,
        }
    }

    fn harness() -> Harness {
        harness_with_ledger(Arc::new(InMemoryLedger::new()))
    }

    fn alice() -> Principal {
        Principal::new("alice")
    }

    #[tokio::test]
    async fn completed_placement_records_and_publishes() {
        let h = harness();

        let outcome = h
            .orchestrator
            .place(&alice(), OrderRequest::new("b1"))
            .await
            .unwrap();

        let receipt = outcome.receipt();
        assert!(!outcome.is_degraded());
        assert_eq!(receipt.order_id.as_str(), "ord_1");
        assert_eq!(receipt.message, "Order placed for book: Dune by Herbert");
        assert_eq!(receipt.order.username, "alice");

        let events = h.broker.published_events("order_events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].order_id, receipt.order_id);
        assert!(events[0].message.contains("Dune"));
        assert_eq!(h.ledger.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_reference_is_rejected_without_side_effects() {
        let h = harness();

        let err = h
            .orchestrator
            .place(&alice(), OrderRequest::new("   "))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            PlacementError::Rejected(ValidationError::EmptyProductReference)
        );
        assert_eq!(h.catalog.calls(), 0);
        assert_eq!(h.ledger.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_product_propagates_status_and_records_nothing() {
        let h = harness();

        let err = h
            .orchestrator
            .place(&alice(), OrderRequest::new("gone"))
            .await
            .unwrap_err();

        assert_eq!(err, PlacementError::UpstreamRejected { status: 410 });
        assert_eq!(h.ledger.count().await.unwrap(), 0);
        assert!(h.broker.published("order_events").is_empty());
    }

    #[tokio::test]
    async fn unreachable_or_garbled_catalog_is_unavailable() {
        let h = harness();

        for product in ["slow", "garbled"] {
            let err = h
                .orchestrator
                .place(&alice(), OrderRequest::new(product))
                .await
                .unwrap_err();
            assert!(matches!(err, PlacementError::UpstreamUnavailable(_)));
        }
        assert_eq!(h.ledger.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn publish_failure_degrades_and_queues_event() {
        let h = harness();
        h.broker.set_publish_failing(true);

        let outcome = h
            .orchestrator
            .place(&alice(), OrderRequest::new("b1"))
            .await
            .unwrap();

        assert!(outcome.is_degraded());
        assert_eq!(h.ledger.count().await.unwrap(), 1);
        assert_eq!(h.republish.len(), 1);
        assert_eq!(
            h.republish.peek().unwrap().event.order_id,
            outcome.receipt().order_id
        );
    }

    #[tokio::test]
    async fn identical_requests_get_distinct_orders() {
        let h = harness();

        let first = h
            .orchestrator
            .place(&alice(), OrderRequest::new("b1"))
            .await
            .unwrap();
        let second = h
            .orchestrator
            .place(&alice(), OrderRequest::new("b1"))
            .await
            .unwrap();

        assert_ne!(first.receipt().order_id, second.receipt().order_id);
        assert_eq!(h.ledger.count().await.unwrap(), 2);
    }

    struct BrokenLedger;

    impl OrderLedger for BrokenLedger {
        fn append(&self, _record: OrderRecord) -> LedgerFuture<'_, ()> {
            Box::pin(async { Err(LedgerError::WriteFailed("disk full".into())) })
        }

        fn list_by_owner<'a>(&'a self, _owner: &'a str) -> LedgerFuture<'a, Vec<OrderRecord>> {
            Box::pin(async { Err(LedgerError::ReadFailed("disk gone".into())) })
        }

        fn list_all(&self) -> LedgerFuture<'_, Vec<OrderRecord>> {
            Box::pin(async { Err(LedgerError::ReadFailed("disk gone".into())) })
        }

        fn count(&self) -> LedgerFuture<'_, usize> {
            Box::pin(async { Ok(0) })
        }
    }

    #[tokio::test]
    async fn recording_failure_publishes_nothing() {
        let h = harness_with_ledger(Arc::new(BrokenLedger));

        let err = h
            .orchestrator
            .place(&alice(), OrderRequest::new("b1"))
            .await
            .unwrap_err();

        assert!(matches!(err, PlacementError::RecordingFailed(_)));
        assert!(h.broker.published("order_events").is_empty());
        assert!(h.republish.is_empty());
    }

    #[tokio::test]
    async fn listing_all_orders_requires_admin() {
        let h = harness();
        h.orchestrator
            .place(&alice(), OrderRequest::new("b1"))
            .await
            .unwrap();
        h.orchestrator
            .place(&Principal::new("bob"), OrderRequest::new("b1"))
            .await
            .unwrap();

        let err = h.orchestrator.all_orders(&alice()).await.unwrap_err();
        assert_eq!(err, PlacementError::Forbidden("alice".into()));

        let admin = Principal::new("root").with_role("admin");
        assert_eq!(h.orchestrator.all_orders(&admin).await.unwrap().len(), 2);
        assert_eq!(h.orchestrator.orders_for(&alice()).await.unwrap().len(), 1);
    }
}
