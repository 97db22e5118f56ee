//! Caller identity extraction.
//!
//! The dashboard sits behind an authenticating proxy that forwards the
//! signed-in user in `x-user-id` (and tenant in `x-tenant-id`), plus the
//! user's bearer assertion for the on-behalf-of exchange. The gateway never
//! validates the assertion itself; the identity provider does that during
//! the exchange.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::api::error::ApiError;

#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    pub tenant_id: Option<String>,
    /// Raw bearer assertion, absent for endpoints that never reach a
    /// backend (listing, deletion).
    pub assertion: Option<String>,
}

impl Caller {
    /// The assertion, required: turn endpoints cannot proceed without it.
    pub fn assertion(&self) -> Result<&str, ApiError> {
        self.assertion
            .as_deref()
            .ok_or_else(|| ApiError::bad_request("missing Authorization bearer token"))
    }
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header_str(parts, "x-user-id")
            .ok_or_else(|| ApiError::bad_request("missing x-user-id header"))?
            .to_owned();
        let tenant_id = header_str(parts, "x-tenant-id").map(str::to_owned);
        let assertion = header_str(parts, "authorization")
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty());

        Ok(Self {
            user_id,
            tenant_id,
            assertion,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(req: Request<()>) -> Result<Caller, ApiError> {
        let (mut parts, _) = req.into_parts();
        Caller::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn requires_user_header() {
        let req = Request::builder().body(()).unwrap();
        assert!(extract(req).await.is_err());
    }

    #[tokio::test]
    async fn parses_full_identity() {
        let req = Request::builder()
            .header("x-user-id", "alice@contoso.com")
            .header("x-tenant-id", "contoso")
            .header("authorization", "Bearer caller-jwt")
            .body(())
            .unwrap();

        let caller = extract(req).await.unwrap();
        assert_eq!(caller.user_id, "alice@contoso.com");
        assert_eq!(caller.tenant_id.as_deref(), Some("contoso"));
        assert_eq!(caller.assertion().unwrap(), "caller-jwt");
    }

    #[tokio::test]
    async fn assertion_is_optional_but_gated() {
        let req = Request::builder()
            .header("x-user-id", "alice")
            .body(())
            .unwrap();

        let caller = extract(req).await.unwrap();
        assert!(caller.assertion.is_none());
        assert!(caller.assertion().is_err());
    }
}
