//! CORS (Cross-Origin Resource Sharing) middleware

use std::collections::HashSet;

use async_trait::async_trait;
use http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE, ORIGIN,
    VARY,
};
use http::{HeaderValue, Method, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{ApiRequest, ApiResponse, Middleware, Next};
use crate::Result;

/// CORS configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins (`"*"` for all)
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    /// Headers readable by the browser
    pub expose_headers: Vec<String>,
    pub allow_credentials: bool,
    /// Preflight cache lifetime
    pub max_age_secs: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: vec!["POST".to_string(), "OPTIONS".to_string()],
            allowed_headers: vec!["Content-Type".to_string(), "Authorization".to_string()],
            expose_headers: vec![
                super::X_RATELIMIT_LIMIT.to_string(),
                super::X_RATELIMIT_REMAINING.to_string(),
                super::X_RATELIMIT_RESET.to_string(),
                "Retry-After".to_string(),
            ],
            allow_credentials: false,
            max_age_secs: Some(86400),
        }
    }
}

impl CorsConfig {
    /// Only the listed origins.
    pub fn restrictive(origins: Vec<String>) -> Self {
        Self {
            allowed_origins: origins,
            ..Self::default()
        }
    }
}

/// Answers preflights, rejects disallowed origins and decorates responses.
pub struct CorsMiddleware {
    config: CorsConfig,
    allowed: HashSet<String>,
    allow_all: bool,
}

impl CorsMiddleware {
    pub fn new(config: CorsConfig) -> Self {
        let allow_all = config.allowed_origins.iter().any(|o| o == "*");
        let allowed = config.allowed_origins.iter().cloned().collect();
        Self {
            config,
            allowed,
            allow_all,
        }
    }

    fn is_origin_allowed(&self, origin: &str) -> bool {
        self.allow_all || self.allowed.contains(origin)
    }

    /// `Access-Control-Allow-Origin` value for a request.
    fn allow_origin(&self, origin: Option<&str>) -> Option<String> {
        match origin {
            Some(o) if self.is_origin_allowed(o) => {
                if self.allow_all && !self.config.allow_credentials {
                    Some("*".to_string())
                } else {
                    Some(o.to_string())
                }
            }
            _ if self.allow_all => Some("*".to_string()),
            _ => None,
        }
    }

    fn decorate(&self, response: &mut ApiResponse, origin: Option<&str>) {
        let Some(value) = self
            .allow_origin(origin)
            .and_then(|v| HeaderValue::from_str(&v).ok())
        else {
            return;
        };
        if value.as_bytes() != b"*" {
            response.headers.append(VARY, HeaderValue::from_static("Origin"));
        }
        response.headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
        if self.config.allow_credentials {
            response
                .headers
                .insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
        if !self.config.expose_headers.is_empty()
            && let Ok(v) = HeaderValue::from_str(&self.config.expose_headers.join(", "))
        {
            response.headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, v);
        }
    }

    fn preflight(&self, origin: Option<&str>) -> ApiResponse {
        let mut response = ApiResponse::empty(StatusCode::NO_CONTENT);
        self.decorate(&mut response, origin);
        if let Ok(v) = HeaderValue::from_str(&self.config.allowed_methods.join(", ")) {
            response.headers.insert(ACCESS_CONTROL_ALLOW_METHODS, v);
        }
        if let Ok(v) = HeaderValue::from_str(&self.config.allowed_headers.join(", ")) {
            response.headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, v);
        }
        if let Some(max_age) = self.config.max_age_secs {
            response
                .headers
                .insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from(max_age));
        }
        response
    }
}

#[async_trait]
impl Middleware for CorsMiddleware {
    async fn process(&self, request: ApiRequest, next: &dyn Next) -> Result<ApiResponse> {
        let origin = request
            .headers
            .get(ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        if let Some(ref o) = origin
            && !self.is_origin_allowed(o)
        {
            debug!(origin = %o, "origin not allowed");
            return Ok(ApiResponse::failure(
                StatusCode::FORBIDDEN,
                "Origin not allowed",
                None,
            ));
        }

        if request.method == Method::OPTIONS {
            return Ok(self.preflight(origin.as_deref()));
        }

        let mut response = next.run(request).await?;
        self.decorate(&mut response, origin.as_deref());
        Ok(response)
    }

    fn name(&self) -> &'static str {
        "cors"
    }
}
