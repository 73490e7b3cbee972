//! Telemetry metric name constants.
//!
//! Centralised metric names for mimir operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `mimir_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `operation`: "generate", "explain" or "improve"
//! - `status`: HTTP status code of the response
//! - `direction`: token direction: "prompt" or "completion"

/// Total requests handled by the orchestrator.
///
/// Labels: `operation`, `status`.
pub const REQUESTS_TOTAL: &str = "mimir_requests_total";

/// Request duration in seconds, measured by the logging middleware.
///
/// Labels: `operation`.
pub const REQUEST_DURATION_SECONDS: &str = "mimir_request_duration_seconds";

/// Total response cache hits.
///
/// Labels: `operation`.
pub const CACHE_HITS_TOTAL: &str = "mimir_cache_hits_total";

/// Total response cache misses.
///
/// Labels: `operation`.
pub const CACHE_MISSES_TOTAL: &str = "mimir_cache_misses_total";

/// Requests denied by the local rate limiter.
pub const RATE_LIMITED_TOTAL: &str = "mimir_rate_limited_total";

/// Total tokens consumed.
///
/// Labels: `direction` ("prompt" | "completion").
pub const TOKENS_TOTAL: &str = "mimir_tokens_total";

/// Accumulated provider cost in micro-dollars.
pub const COST_MICRO_USD_TOTAL: &str = "mimir_cost_micro_usd_total";

/// Usage-store writes that failed and were swallowed.
pub const USAGE_RECORD_FAILURES_TOTAL: &str = "mimir_usage_record_failures_total";
