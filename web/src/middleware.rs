//! Correlation-id middleware.
//!
//! 1. **Extract** the correlation ID from `X-Correlation-ID` (or generate a UUID)
//! 2. **Store** it in request extensions for handler access
//! 3. **Create** an `http_request` tracing span carrying it
//! 4. **Echo** it in the response `X-Correlation-ID` header
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, routing::get};
//! use order_pipeline_web::middleware::correlation_id_layer;
//!
//! let app = Router::new()
//!     .route("/orders", get(list_orders))
//!     .layer(correlation_id_layer());
//! ```

use crate::extractors::CorrelationId;
use axum::{extract::Request, http::HeaderValue, response::Response};
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;

/// Header name for correlation ID.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Create a layer that adds correlation ID tracking to all requests.
#[must_use]
pub const fn correlation_id_layer() -> CorrelationIdLayer {
    CorrelationIdLayer
}

/// Layer for correlation ID tracking.
#[derive(Clone, Debug)]
pub struct CorrelationIdLayer;

impl<S> Layer<S> for CorrelationIdLayer {
    type Service = CorrelationIdMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationIdMiddleware { inner }
    }
}

/// Middleware service for correlation ID tracking.
#[derive(Clone, Debug)]
pub struct CorrelationIdMiddleware<S> {
    inner: S,
}

impl<S> Service<Request> for CorrelationIdMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let correlation_id = CorrelationId::from_headers(req.headers());
        req.extensions_mut().insert(correlation_id.clone());

        let span = tracing::info_span!(
            "http_request",
            correlation_id = %correlation_id,
            method = %req.method(),
            uri = %req.uri(),
        );

        let fut = self.inner.call(req);

        Box::pin(async move {
            let mut response = fut.instrument(span).await?;

            if let Ok(header_value) = HeaderValue::from_str(correlation_id.as_str()) {
                response
                    .headers_mut()
                    .insert(CORRELATION_ID_HEADER, header_value);
            }

            Ok(response)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::Request, routing::get};
    use tower::ServiceExt;
    use uuid::Uuid;

    fn app() -> Router {
        Router::new()
            .route(
                "/test",
                get(|id: CorrelationId| async move { id.as_str().to_string() }),
            )
            .layer(correlation_id_layer())
    }

    async fn echoed(request: Request<Body>) -> (String, String) {
        let response = app().oneshot(request).await.unwrap();
        let header = response
            .headers()
            .get(CORRELATION_ID_HEADER)
            .expect("Correlation ID header should be present")
            .to_str()
            .unwrap()
            .to_string();
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        (header, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn generates_id_when_missing() {
        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();

        let (header, seen_by_handler) = echoed(request).await;

        assert!(Uuid::parse_str(&header).is_ok());
        assert_eq!(header, seen_by_handler);
    }

    #[tokio::test]
    async fn echoes_caller_supplied_id() {
        let request = Request::builder()
            .uri("/test")
            .header(CORRELATION_ID_HEADER, "checkout-42")
            .body(Body::empty())
            .unwrap();

        let (header, seen_by_handler) = echoed(request).await;

        assert_eq!(header, "checkout-42");
        assert_eq!(seen_by_handler, "checkout-42");
    }

    #[tokio::test]
    async fn replaces_unusable_id() {
        let request = Request::builder()
            .uri("/test")
            .header(CORRELATION_ID_HEADER, "x".repeat(300))
            .body(Body::empty())
            .unwrap();

        let (header, _) = echoed(request).await;

        assert!(Uuid::parse_str(&header).is_ok());
    }
}
