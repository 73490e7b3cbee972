//! Caller identity resolution.
//!
//! Identities are opaque strings. The bundled resolver takes the bearer
//! credential from the `Authorization` header verbatim; deployments that
//! validate tokens against an auth service plug in their own
//! [`IdentityResolver`].

use async_trait::async_trait;
use http::HeaderMap;
use http::header::AUTHORIZATION;

use crate::Result;

/// Resolve the caller identity from request headers.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Returns `Ok(None)` when the request carries no usable credential.
    async fn resolve(&self, headers: &HeaderMap) -> Result<Option<String>>;
}

/// Treats the bearer token itself as the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct BearerIdentity;

#[async_trait]
impl IdentityResolver for BearerIdentity {
    async fn resolve(&self, headers: &HeaderMap) -> Result<Option<String>> {
        Ok(bearer_token(headers).map(str::to_owned))
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(auth: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(AUTHORIZATION, HeaderValue::from_str(auth).unwrap());
        h
    }

    #[test]
    fn parses_bearer() {
        assert_eq!(bearer_token(&headers("Bearer abc123")), Some("abc123"));
        assert_eq!(bearer_token(&headers("bearer  xyz ")), Some("xyz"));
    }

    #[test]
    fn rejects_other_schemes() {
        assert_eq!(bearer_token(&headers("Basic dXNlcjpwYXNz")), None);
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn resolver_returns_token() {
        let id = BearerIdentity.resolve(&headers("Bearer u-1")).await.unwrap();
        assert_eq!(id.as_deref(), Some("u-1"));
    }
}
