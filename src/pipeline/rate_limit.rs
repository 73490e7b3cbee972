//! Rate-limit middleware over [`RateLimiter`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderMap, HeaderValue};
use tracing::warn;

use super::{ApiRequest, ApiResponse, Middleware, Next};
use crate::identity::IdentityResolver;
use crate::ratelimit::{RateDecision, RateLimiter};
use crate::{MimirError, Result};

pub const X_RATELIMIT_LIMIT: &str = "X-RateLimit-Limit";
pub const X_RATELIMIT_REMAINING: &str = "X-RateLimit-Remaining";
pub const X_RATELIMIT_RESET: &str = "X-RateLimit-Reset";

/// Identity used when neither a credential nor a forwarded address is present.
const ANONYMOUS: &str = "anonymous";

/// Admits or denies each request before it reaches the handler.
///
/// The key is the resolved caller identity, else the first
/// `X-Forwarded-For` address, else `"anonymous"`. A resolved identity is
/// stored on the request for downstream use.
pub struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
    identity: Arc<dyn IdentityResolver>,
}

impl RateLimitMiddleware {
    pub fn new(limiter: Arc<RateLimiter>, identity: Arc<dyn IdentityResolver>) -> Self {
        Self { limiter, identity }
    }

    async fn key(&self, request: &mut ApiRequest) -> String {
        if request.identity.is_none() {
            match self.identity.resolve(&request.headers).await {
                Ok(id) => request.identity = id,
                Err(e) => warn!(error = %e, "identity resolution failed"),
            }
        }
        if let Some(ref id) = request.identity {
            return id.clone();
        }
        forwarded_for(&request.headers).unwrap_or_else(|| ANONYMOUS.to_string())
    }
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("x-forwarded-for")?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    (!first.is_empty()).then(|| first.to_string())
}

fn set_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    if let Ok(reset) = HeaderValue::from_str(&decision.reset_at.to_rfc3339()) {
        headers.insert(X_RATELIMIT_RESET, reset);
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    async fn process(&self, mut request: ApiRequest, next: &dyn Next) -> Result<ApiResponse> {
        let key = self.key(&mut request).await;
        let decision = self.limiter.admit(&key);

        let mut response = if decision.allowed {
            next.run(request).await?
        } else {
            ApiResponse::from_error(&MimirError::RateLimited {
                limit: decision.limit,
                reset_at: decision.reset_at,
                retry_after: Duration::from_secs(decision.retry_after_secs()),
            })
        };
        set_headers(&mut response.headers, &decision);
        Ok(response)
    }

    fn name(&self) -> &'static str {
        "rate_limit"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::BearerIdentity;
    use crate::pipeline::{Handler, Pipeline};
    use crate::ratelimit::RateLimitConfig;
    use http::StatusCode;
    use serde_json::json;

    struct Ok200;

    #[async_trait]
    impl Handler for Ok200 {
        async fn handle(&self, request: ApiRequest) -> Result<ApiResponse> {
            Ok(ApiResponse::success(json!({ "identity": request.identity })))
        }
    }

    fn pipeline(max: u32) -> (Pipeline, Arc<RateLimiter>) {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::new().max_requests(max)));
        let mw = RateLimitMiddleware::new(limiter.clone(), Arc::new(BearerIdentity));
        (Pipeline::compose(vec![Arc::new(mw)], Arc::new(Ok200)), limiter)
    }

    #[tokio::test]
    async fn headers_on_admission() {
        let (p, _) = pipeline(2);
        let resp = p
            .execute(ApiRequest::post("/api/explain", json!({})).header("authorization", "Bearer u1"))
            .await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.header("x-ratelimit-limit"), Some("2"));
        assert_eq!(resp.header("x-ratelimit-remaining"), Some("1"));
        assert!(resp.header("x-ratelimit-reset").is_some());
        assert_eq!(resp.json().unwrap()["data"]["identity"], "u1");
    }

    #[tokio::test]
    async fn denial_is_429_with_retry_after() {
        let (p, _) = pipeline(1);
        let req = || ApiRequest::post("/api/explain", json!({})).header("authorization", "Bearer u1");
        assert_eq!(p.execute(req()).await.status, StatusCode::OK);
        let denied = p.execute(req()).await;
        assert_eq!(denied.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(denied.header("x-ratelimit-remaining"), Some("0"));
        let retry: u64 = denied.header("retry-after").unwrap().parse().unwrap();
        assert!(retry > 0 && retry <= 60);
        let body = denied.json().unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["details"]["limit"], 1);
    }

    #[tokio::test]
    async fn falls_back_to_forwarded_address_then_anonymous() {
        let (p, limiter) = pipeline(5);
        p.execute(ApiRequest::post("/x", json!({})).header("x-forwarded-for", "10.0.0.1, 10.0.0.2"))
            .await;
        p.execute(ApiRequest::post("/x", json!({}))).await;
        assert!(limiter.window("10.0.0.1").is_some());
        assert!(limiter.window("anonymous").is_some());
    }
}
