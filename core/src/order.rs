//! Order domain types.
//!
//! Orders have exactly one lifecycle state in this system: an order exists in
//! the ledger as `completed` or it does not exist at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Role that unlocks the ledger-wide order listing.
pub const ADMIN_ROLE: &str = "admin";

/// Unique identifier for an order
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Creates a new `OrderId` from a string
    #[must_use]
    pub const fn new(id: String) -> Self {
        Self(id)
    }

    /// Returns the inner string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request body for placing an order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Opaque product reference resolved against the catalog.
    pub book_id: String,
}

impl OrderRequest {
    /// Creates a request for the given product reference.
    #[must_use]
    pub fn new(book_id: impl Into<String>) -> Self {
        Self {
            book_id: book_id.into(),
        }
    }

    /// Validates the request and returns the product reference.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyProductReference`] if the reference is
    /// empty or only whitespace, and
    /// [`ValidationError::InvalidProductReference`] if it is a relative path
    /// segment (`.` or `..`, percent-encoded or not) that cannot name a
    /// catalog entry.
    pub fn validate(&self) -> Result<&str, ValidationError> {
        if self.book_id.trim().is_empty() {
            return Err(ValidationError::EmptyProductReference);
        }
        let decoded = self.book_id.to_ascii_lowercase().replace("%2e", ".");
        if decoded == "." || decoded == ".." {
            return Err(ValidationError::InvalidProductReference(self.book_id.clone()));
        }
        Ok(&self.book_id)
    }
}

/// Client-fixable input errors. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The product reference was empty
    #[error("book_id must not be empty")]
    EmptyProductReference,

    /// The product reference is a relative path segment
    #[error("book_id '{0}' is not a valid product reference")]
    InvalidProductReference(String),

    /// The request body could not be parsed
    #[error("Invalid request body: {0}")]
    MalformedBody(String),
}

/// Canonical product data as served by the catalog.
///
/// Unknown fields in the catalog response are ignored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    /// Catalog identifier
    pub id: String,
    /// Book title
    pub title: String,
    /// Author attribution
    pub author: String,
}

/// Status of a placed order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Order was recorded
    #[default]
    Completed,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// A placed order as kept in the ledger.
///
/// Created once by the orchestrator and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Order identifier
    pub id: OrderId,
    /// Catalog identifier of the ordered book
    pub book_id: String,
    /// Title at placement time
    pub book_title: String,
    /// Author at placement time
    pub book_author: String,
    /// When the order was placed
    pub order_date: DateTime<Utc>,
    /// Order status (always `completed`)
    pub status: OrderStatus,
    /// Owning principal
    pub username: String,
}

impl OrderRecord {
    /// Builds the record for a freshly resolved product.
    #[must_use]
    pub fn from_product(
        id: OrderId,
        product: &ProductRecord,
        owner: impl Into<String>,
        placed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            book_id: product.id.clone(),
            book_title: product.title.clone(),
            book_author: product.author.clone(),
            order_date: placed_at,
            status: OrderStatus::Completed,
            username: owner.into(),
        }
    }

    /// Whether `principal` owns this order.
    #[must_use]
    pub fn is_owned_by(&self, principal: &str) -> bool {
        self.username == principal
    }
}

/// Authenticated caller identity.
///
/// Token verification happens upstream; this type only carries the result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    /// Username the order is attributed to
    pub username: String,
    /// Roles granted by the auth layer
    pub roles: BTreeSet<String>,
}

impl Principal {
    /// Creates a principal with no roles.
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            roles: BTreeSet::new(),
        }
    }

    /// Adds a role.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// Whether the principal may see every caller's orders.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.roles.contains(ADMIN_ROLE)
    }
}

/// Result of a successful placement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlacementReceipt {
    /// Human-readable confirmation
    pub message: String,
    /// Identifier of the new order
    pub order_id: OrderId,
    /// The recorded order
    pub order: OrderRecord,
}

impl PlacementReceipt {
    /// Builds the receipt for a recorded order.
    #[must_use]
    pub fn for_order(order: OrderRecord) -> Self {
        Self {
            message: format!(
                "Order placed for book: {} by {}",
                order.book_title, order.book_author
            ),
            order_id: order.id.clone(),
            order,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    fn dune() -> ProductRecord {
        ProductRecord {
            id: "b1".to_string(),
            title: "Dune".to_string(),
            author: "Herbert".to_string(),
        }
    }

    #[test]
    fn empty_and_blank_references_are_rejected() {
        assert_eq!(
            OrderRequest::new("").validate(),
            Err(ValidationError::EmptyProductReference)
        );
        assert_eq!(
            OrderRequest::new("   ").validate(),
            Err(ValidationError::EmptyProductReference)
        );
        assert_eq!(OrderRequest::new("b1").validate(), Ok("b1"));
    }

    #[test]
    fn dot_segment_references_are_rejected() {
        for id in [".", "..", "%2e", "%2E%2e", ".%2e"] {
            assert_eq!(
                OrderRequest::new(id).validate(),
                Err(ValidationError::InvalidProductReference(id.to_string())),
                "{id}"
            );
        }
        assert_eq!(OrderRequest::new("...").validate(), Ok("..."));
        assert_eq!(OrderRequest::new("b.1").validate(), Ok("b.1"));
    }

    #[test]
    fn request_requires_book_id_field() {
        let missing = serde_json::from_str::<OrderRequest>("{}");
        assert!(missing.is_err());

        let parsed: OrderRequest = serde_json::from_str(r#"{"book_id":"b1"}"#).unwrap();
        assert_eq!(parsed.book_id, "b1");
    }

    #[test]
    fn product_ignores_unknown_fields() {
        let body = r#"{"id":"b1","title":"Dune","author":"Herbert","isbn":"x"}"#;
        let product: ProductRecord = serde_json::from_str(body).unwrap();
        assert_eq!(product, dune());
    }

    #[test]
    fn record_serializes_with_ledger_field_names() {
        let placed_at = Utc::now();
        let record = OrderRecord::from_product(
            OrderId::new("ord_1_1".to_string()),
            &dune(),
            "alice",
            placed_at,
        );

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], "ord_1_1");
        assert_eq!(json["book_id"], "b1");
        assert_eq!(json["book_title"], "Dune");
        assert_eq!(json["book_author"], "Herbert");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["username"], "alice");
        assert!(record.is_owned_by("alice"));
        assert!(!record.is_owned_by("bob"));
    }

    #[test]
    fn receipt_message_names_title_and_author() {
        let record = OrderRecord::from_product(
            OrderId::new("ord_1_1".to_string()),
            &dune(),
            "alice",
            Utc::now(),
        );
        let receipt = PlacementReceipt::for_order(record);
        assert_eq!(receipt.message, "Order placed for book: Dune by Herbert");
        assert_eq!(receipt.order_id.as_str(), "ord_1_1");
    }

    #[test]
    fn admin_role_is_explicit() {
        assert!(!Principal::new("alice").is_admin());
        assert!(Principal::new("root").with_role(ADMIN_ROLE).is_admin());
        assert!(!Principal::new("eve").with_role("support").is_admin());
    }
}
