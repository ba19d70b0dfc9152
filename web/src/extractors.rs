//! Custom Axum extractors.
//!
//! - [`CorrelationId`]: the request's correlation ID
//! - [`AuthenticatedPrincipal`]: the caller identity asserted by the gateway
//!
//! # Examples
//!
//! ```ignore
//! use order_pipeline_web::extractors::{AuthenticatedPrincipal, CorrelationId};
//!
//! async fn handler(
//!     AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
//!     correlation_id: CorrelationId,
//! ) -> String {
//!     tracing::info!(%correlation_id, username = %principal.username, "Listing orders");
//!     principal.username
//! }
//! ```

use crate::error::AppError;
use crate::middleware::CORRELATION_ID_HEADER;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{HeaderMap, request::Parts},
};
use order_pipeline_core::order::Principal;
use std::fmt;
use uuid::Uuid;

/// Header naming the authenticated user, set by the gateway.
pub const USER_HEADER: &str = "X-Authenticated-User";

/// Comma-separated roles of the authenticated user, set by the gateway.
pub const ROLES_HEADER: &str = "X-Authenticated-Roles";

const MAX_CORRELATION_ID_LEN: usize = 128;

/// Correlation ID for request tracing.
///
/// Taken from the `X-Correlation-ID` header when it is a short printable
/// token, otherwise a fresh UUID v4.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Reads the header, or generates an id if it is absent or unusable.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| is_usable(s))
            .map_or_else(Self::generate, |s| Self(s.to_string()))
    }

    /// A fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The id as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_usable(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_CORRELATION_ID_LEN
        && id.bytes().all(|b| b.is_ascii_graphic())
}

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // The middleware already settled on an id; reuse it so logs and the
        // response header agree.
        if let Some(id) = parts.extensions.get::<Self>() {
            return Ok(id.clone());
        }
        Ok(Self::from_headers(&parts.headers))
    }
}

/// Caller identity asserted by the gateway.
///
/// Token verification happens upstream; this service trusts
/// `X-Authenticated-User` and `X-Authenticated-Roles`. A missing or blank
/// user header is rejected with 401.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedPrincipal(pub Principal);

impl AuthenticatedPrincipal {
    /// Builds the principal from trusted headers.
    ///
    /// # Errors
    ///
    /// Returns a 401 [`AppError`] if the user header is missing or blank.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AppError> {
        let username = headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::unauthorized("Authentication required"))?;

        let roles = headers
            .get_all(ROLES_HEADER)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|role| !role.is_empty());

        let principal = roles.fold(Principal::new(username), |p, role| p.with_role(role));
        Ok(Self(principal))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedPrincipal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}
