//! HTTP request handlers.

pub mod health;
pub mod orders;

pub use health::{health_check, metrics_endpoint, readiness};
pub use orders::{list_all_orders, list_orders, place_order};
