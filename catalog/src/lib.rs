//! # Order Pipeline Catalog
//!
//! HTTP implementation of the catalog lookup seam.
//!
//! ## Example
//!
//! ```no_run
//! use order_pipeline_catalog::HttpCatalogClient;
//! use order_pipeline_core::catalog::CatalogClient;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = HttpCatalogClient::new("http://book-service:8082/books", Duration::from_secs(5))?;
//!
//!     let book = catalog.fetch("b1").await?;
//!     println!("{} by {}", book.title, book.author);
//!     Ok(())
//! }
//! ```

pub mod client;

pub use client::{CatalogSetupError, HttpCatalogClient};
