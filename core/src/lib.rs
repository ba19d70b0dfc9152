//! # Order Pipeline Core
//!
//! Domain types and service seams for the order placement pipeline.
//!
//! The pipeline places a book order in three legs, each with its own failure
//! domain:
//!
//! ```text
//! ┌──────────┐   fetch    ┌────────────────┐
//! │  Client  │──────────► │ Catalog (HTTP) │   1. resolve product
//! └────┬─────┘            └────────────────┘
//!      │ append
//!      ▼
//! ┌──────────┐                                2. record order
//! │  Ledger  │
//! └────┬─────┘
//!      │ publish
//!      ▼
//! ┌──────────────┐  order_events  ┌────────────────────┐
//! │    Broker    │ ─────────────► │ Notification worker │ 3. notify
//! └──────────────┘                └────────────────────┘
//! ```
//!
//! This crate holds only the vocabulary shared by every leg: the records, the
//! wire event, and the traits behind which each external collaborator sits.
//! Implementations live in `order-pipeline-runtime` (ledger, orchestrator,
//! publisher, worker), `order-pipeline-catalog` (HTTP catalog client) and
//! `order-pipeline-redpanda` (Kafka-protocol broker).
//!
//! ## Modules
//!
//! - [`order`]: requests, product and order records, principals
//! - [`event`]: the `order placed` wire payload
//! - [`catalog`]: catalog lookup seam
//! - [`ledger`]: order ledger seam
//! - [`broker`]: queue binding, sessions, deliveries, acknowledgment
//! - [`notification`]: notification side-effect seam
//! - [`environment`]: clock and order-id generation

pub mod broker;
pub mod catalog;
pub mod environment;
pub mod event;
pub mod ledger;
pub mod notification;
pub mod order;

pub use broker::{BrokerError, QueueBinding, ORDER_EVENTS_QUEUE};
pub use catalog::{CatalogClient, CatalogError};
pub use event::OrderEvent;
pub use ledger::{LedgerError, OrderLedger};
pub use order::{OrderId, OrderRecord, OrderRequest, Principal, ProductRecord};

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
