//! Request logging middleware.

use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{ApiRequest, ApiResponse, Middleware, Next};
use crate::{Result, telemetry};

/// Logs start and end of every request and records its duration.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn process(&self, request: ApiRequest, next: &dyn Next) -> Result<ApiResponse> {
        let method = request.method.clone();
        let path = request.path.clone();
        let operation = request.operation().to_string();
        let start = Instant::now();
        debug!(%method, %path, "request started");

        let result = next.run(request).await;
        let elapsed = start.elapsed();
        metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS, "operation" => operation)
            .record(elapsed.as_secs_f64());
        let duration_ms = elapsed.as_millis() as u64;

        match &result {
            Ok(response) => info!(
                %method,
                %path,
                status = response.status.as_u16(),
                duration_ms,
                "request completed"
            ),
            Err(e) => warn!(%method, %path, error = %e, duration_ms, "request failed"),
        }
        result
    }

    fn name(&self) -> &'static str {
        "logging"
    }
}
