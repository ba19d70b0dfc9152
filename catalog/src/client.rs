//! Catalog HTTP client implementation

use order_pipeline_core::catalog::{CatalogClient, CatalogError};
use order_pipeline_core::order::ProductRecord;
use reqwest::{Client, Url};
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors raised while building the client.
#[derive(Debug, Error)]
pub enum CatalogSetupError {
    /// The base URL cannot carry a product path segment
    #[error("Invalid catalog base URL '{url}': {reason}")]
    InvalidBaseUrl {
        /// The URL as configured
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// The HTTP client could not be constructed
    #[error("Failed to build HTTP client: {0}")]
    Build(String),
}

/// Catalog client issuing `GET <base_url>/<product_id>`.
#[derive(Clone, Debug)]
pub struct HttpCatalogClient {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpCatalogClient {
    /// Create a client for the catalog at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogSetupError`] if the URL is not an absolute http(s) URL
    /// or the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CatalogSetupError> {
        let parsed = Url::parse(base_url).map_err(|e| CatalogSetupError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if parsed.cannot_be_a_base() || !matches!(parsed.scheme(), "http" | "https") {
            return Err(CatalogSetupError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: "expected an http(s) URL".to_string(),
            });
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CatalogSetupError::Build(e.to_string()))?;

        Ok(Self {
            client,
            base_url: parsed,
            timeout,
        })
    }

    /// The configured request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// URL for one product, with the id encoded as a single path segment.
    #[must_use]
    pub fn product_url(&self, product_id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(product_id);
        }
        url
    }

    async fn lookup(&self, product_id: &str) -> Result<ProductRecord, CatalogError> {
        let url = self.product_url(product_id);
        let started = Instant::now();

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            let reason = if e.is_timeout() {
                format!("timed out after {}ms", self.timeout.as_millis())
            } else {
                e.to_string()
            };
            tracing::warn!(%url, latency_ms = started.elapsed().as_millis(), error = %reason, "Catalog request failed");
            CatalogError::Unavailable(reason)
        })?;

        let status = response.status();
        tracing::debug!(%url, status = status.as_u16(), latency_ms = started.elapsed().as_millis(), "Catalog responded");

        if !status.is_success() {
            return Err(CatalogError::NotFound {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| {
            tracing::warn!(%url, error = %e, "Catalog response body could not be read");
            CatalogError::Unavailable(e.to_string())
        })?;

        serde_json::from_slice::<ProductRecord>(&body).map_err(|e| {
            tracing::warn!(%url, error = %e, "Catalog response body is not a product");
            CatalogError::InvalidResponse(e.to_string())
        })
    }
}

impl CatalogClient for HttpCatalogClient {
    fn fetch<'a>(
        &'a self,
        product_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ProductRecord, CatalogError>> + Send + 'a>> {
        Box::pin(self.lookup(product_id))
    }
}
