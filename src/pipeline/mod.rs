//! Request pipeline: a transport-neutral request/response pair and an
//! ordered middleware chain around a terminal handler.
//!
//! Middleware run outermost first. Each receives the request and a [`Next`]
//! continuation; it may answer directly (CORS preflight, rate-limit denial)
//! or call `next.run()` and decorate the response. Errors returned anywhere
//! in the chain are rendered into error responses by [`Pipeline::execute`],
//! so callers always get an [`ApiResponse`].

mod chain;
mod cors;
mod logging;
mod rate_limit;

pub use chain::Pipeline;
pub use cors::{CorsConfig, CorsMiddleware};
pub use logging::LoggingMiddleware;
pub use rate_limit::{
    RateLimitMiddleware, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};

use std::fmt;

use async_trait::async_trait;
use http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE, RETRY_AFTER};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde_json::{Value, json};

use crate::stream::FrameStream;
use crate::{MimirError, Result};

/// An inbound operation request.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Value,
    /// Caller identity, once a middleware or handler has resolved it.
    pub identity: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>, body: Value) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body,
            identity: None,
        }
    }

    /// `POST` request, the shape every operation uses.
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path, body)
    }

    /// Add a header. Invalid names or values are ignored.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            http::header::HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Last path segment, used as the operation label (`/api/explain` → `explain`).
    pub fn operation(&self) -> &str {
        self.path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }
}

/// Response payload.
pub enum ResponseBody {
    Json(Value),
    Stream(FrameStream),
    Empty,
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Json(v) => f.debug_tuple("Json").field(v).finish(),
            ResponseBody::Stream(_) => f.write_str("Stream(..)"),
            ResponseBody::Empty => f.write_str("Empty"),
        }
    }
}

/// An outbound response.
#[derive(Debug)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl ApiResponse {
    /// `{success: true, data}` with status 200.
    pub fn success(data: Value) -> Self {
        Self {
            status: StatusCode::OK,
            headers: json_headers(),
            body: ResponseBody::Json(json!({ "success": true, "data": data })),
        }
    }

    /// `{success: false, error, details?}`.
    pub fn failure(status: StatusCode, error: impl Into<String>, details: Option<Value>) -> Self {
        let mut body = json!({ "success": false, "error": error.into() });
        if let Some(details) = details {
            body["details"] = details;
        }
        Self {
            status,
            headers: json_headers(),
            body: ResponseBody::Json(body),
        }
    }

    /// Render an error, including `Retry-After` when the error carries one.
    pub fn from_error(err: &MimirError) -> Self {
        let mut response = Self::failure(err.status(), err.public_message(), err.details());
        if let Some(retry) = err.retry_after() {
            let secs = retry.as_secs() + u64::from(retry.subsec_nanos() > 0);
            response.headers.insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }

    /// Server-sent-events response over a frame stream.
    pub fn stream(frames: FrameStream) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        Self {
            status: StatusCode::OK,
            headers,
            body: ResponseBody::Stream(frames),
        }
    }

    /// Bodiless response.
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: ResponseBody::Empty,
        }
    }

    /// JSON body, if this is a JSON response.
    pub fn json(&self) -> Option<&Value> {
        match &self.body {
            ResponseBody::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Header value as a string, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

/// Terminal request handler.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, request: ApiRequest) -> Result<ApiResponse>;
}

/// Continuation to the rest of the chain.
#[async_trait]
pub trait Next: Send + Sync {
    async fn run(&self, request: ApiRequest) -> Result<ApiResponse>;
}

/// A wrapper around the rest of the chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn process(&self, request: ApiRequest, next: &dyn Next) -> Result<ApiResponse>;

    /// Name for logging.
    fn name(&self) -> &'static str;
}
