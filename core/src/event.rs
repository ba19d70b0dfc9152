//! The `order placed` wire event.
//!
//! Published once per recorded order onto the `order_events` queue as JSON.
//! Consumers must tolerate fields they do not know about, so decoding never
//! rejects extra keys.

use crate::order::{OrderId, OrderRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content type attached to every published event.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Event emitted after an order has been recorded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    /// Order identifier (stable across redeliveries; usable for dedupe)
    pub order_id: OrderId,
    /// Catalog identifier of the ordered book
    pub book_id: String,
    /// Book title
    pub title: String,
    /// Author attribution
    pub author: String,
    /// Owning principal
    pub username: String,
    /// When the event was produced
    pub timestamp: DateTime<Utc>,
    /// Human-readable summary
    pub message: String,
}

impl OrderEvent {
    /// Builds the event for a recorded order.
    #[must_use]
    pub fn from_record(record: &OrderRecord, timestamp: DateTime<Utc>) -> Self {
        Self {
            order_id: record.id.clone(),
            book_id: record.book_id.clone(),
            title: record.book_title.clone(),
            author: record.book_author.clone(),
            username: record.username.clone(),
            timestamp,
            message: format!(
                "Order {} placed for book: {} by {}",
                record.id, record.book_title, record.book_author
            ),
        }
    }

    /// Serializes the event to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parses an event from its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a structurally valid event.
    pub fn from_json(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use crate::order::ProductRecord;

    fn record() -> OrderRecord {
        OrderRecord::from_product(
            OrderId::new("ord_1700000000_1".to_string()),
            &ProductRecord {
                id: "b1".to_string(),
                title: "Dune".to_string(),
                author: "Herbert".to_string(),
            },
            "alice",
            Utc::now(),
        )
    }

    #[test]
    fn message_mentions_order_title_and_author() {
        let event = OrderEvent::from_record(&record(), Utc::now());
        assert_eq!(
            event.message,
            "Order ord_1700000000_1 placed for book: Dune by Herbert"
        );
    }

    #[test]
    fn wire_fields_match_queue_contract() {
        let event = OrderEvent::from_record(&record(), Utc::now());
        let json: serde_json::Value =
            serde_json::from_slice(&event.to_json().unwrap()).unwrap();

        let mut keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec!["author", "book_id", "message", "order_id", "timestamp", "title", "username"]
        );
        assert_eq!(json["order_id"], "ord_1700000000_1");
    }

    #[test]
    fn decoding_tolerates_unknown_fields() {
        let payload = br#"{
            "order_id": "ord_1_1",
            "book_id": "b1",
            "title": "Dune",
            "author": "Herbert",
            "username": "alice",
            "timestamp": "2024-01-01T00:00:00Z",
            "message": "hi",
            "priority": "high"
        }"#;

        let event = OrderEvent::from_json(payload).unwrap();
        assert_eq!(event.order_id.as_str(), "ord_1_1");
    }

    #[test]
    fn decoding_rejects_structurally_invalid_payload() {
        assert!(OrderEvent::from_json(b"not json").is_err());
        assert!(OrderEvent::from_json(br#"{"order_id": 5}"#).is_err());
    }
}
