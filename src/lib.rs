//! Mimir - request orchestration and quota accounting for LLM-backed code
//! assistance.
//!
//! Three operations are offered: `generate` (code from a description),
//! `explain` (structured walkthrough of a snippet) and `improve` (review
//! with issues, suggestions and a rewrite). Each request passes through a
//! middleware pipeline (logging, CORS, fixed-window rate limiting) into an
//! [`Orchestrator`] that serves cached results, enforces monthly token
//! quotas, calls the provider (buffered or streamed), parses and prices the
//! response, and records usage.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use llm::builder::LLMBackend;
//! use mimir::{ApiRequest, Orchestrator};
//! use mimir::providers::LlmChatProvider;
//!
//! #[tokio::main]
//! async fn main() {
//!     let provider = LlmChatProvider::new(LLMBackend::Anthropic, Some("sk-ant-..."), "anthropic");
//!     let orchestrator = Arc::new(Orchestrator::builder(Arc::new(provider)).build());
//!
//!     let request = ApiRequest::post(
//!         "/api/explain",
//!         serde_json::json!({ "code": "fn main() { println!(\"hi\"); }" }),
//!     )
//!     .header("authorization", "Bearer user-42");
//!
//!     let response = orchestrator.handle(request).await;
//!     println!("{} {:?}", response.status, response.json());
//! }
//! ```

pub mod cache;
pub mod config;
mod convert;
pub mod error;
pub mod identity;
pub mod operations;
pub mod orchestrator;
pub mod parser;
pub mod pipeline;
pub mod pricing;
pub mod providers;
pub mod ratelimit;
pub mod stream;
pub mod telemetry;
pub mod types;
pub mod usage;
pub mod version;

pub use cache::{CacheConfig, CacheKey, ResponseCache};
pub use config::Config;
pub use error::{FieldError, MimirError, Result};
pub use identity::{BearerIdentity, IdentityResolver};
pub use operations::{
    ExplainRequest, ExplainResult, GenerateRequest, GenerateResult, ImproveRequest,
    ImproveResult, Operation,
};
pub use orchestrator::{OperationHandler, Orchestrator, OrchestratorBuilder};
pub use parser::{
    Issue, ParsedExplanation, ParsedImprovement, Severity, Suggestion, parse_explanation,
    parse_improvement,
};
pub use pipeline::{ApiRequest, ApiResponse, Pipeline, ResponseBody};
pub use pricing::{PricingEntry, PricingTable, calculate_cost};
pub use providers::ChatProvider;
pub use ratelimit::{RateDecision, RateLimitConfig, RateLimiter};
pub use stream::{FrameStream, StreamFrame, frame_stream};
pub use types::{ChatEvent, ChatOptions, ChatResponse, Message, Role, Usage};
pub use usage::{PlanLookup, PlansConfig, Quota, UsageAggregator, UsageRecord, UsageStore};
