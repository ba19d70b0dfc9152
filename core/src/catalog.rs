//! Catalog lookup seam.
//!
//! The catalog is the service of record for product metadata. Each lookup is
//! one independent request: no retry and no caching happen behind this trait.

use crate::order::ProductRecord;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors returned by a catalog lookup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// The catalog answered with a non-success status
    #[error("Catalog returned status {status}")]
    NotFound {
        /// Upstream HTTP status
        status: u16,
    },

    /// The catalog could not be reached (refused, DNS, timeout)
    #[error("Catalog unavailable: {0}")]
    Unavailable(String),

    /// The catalog answered successfully but the body was unusable
    #[error("Catalog response invalid: {0}")]
    InvalidResponse(String),
}

/// Resolves product references to canonical records.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so the orchestrator can hold an
/// `Arc<dyn CatalogClient>`.
pub trait CatalogClient: Send + Sync {
    /// Fetch the product identified by `product_id`.
    ///
    /// The caller guarantees `product_id` is non-empty.
    ///
    /// # Errors
    ///
    /// - [`CatalogError::NotFound`] for any non-success upstream status
    /// - [`CatalogError::Unavailable`] for transport failures and timeouts
    /// - [`CatalogError::InvalidResponse`] for an undecodable success body
    fn fetch<'a>(
        &'a self,
        product_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ProductRecord, CatalogError>> + Send + 'a>>;
}
