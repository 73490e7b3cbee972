//! Request orchestration for generate, explain and improve.
//!
//! [`Orchestrator`] owns every piece of shared state (rate limiter, response
//! cache, usage aggregator, pricing table) and runs each operation through
//! the same sequence:
//!
//! 1. serve from the cache when a fresh result exists (buffered calls only)
//! 2. check the caller's monthly token quota
//! 3. build provider messages from the operation's prompt template
//! 4. call the provider, buffered or streamed
//! 5. parse the response and price it (buffered calls)
//! 6. write the cache and record usage
//!
//! Validation, identity and rate limiting happen at the request layer:
//! [`Orchestrator::pipeline`] composes logging, CORS and rate-limit
//! middleware around an [`OperationHandler`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::FutureExt;
use tracing::{debug, info, warn};

use crate::cache::{CacheConfig, CacheKey, ResponseCache};
use crate::identity::{BearerIdentity, IdentityResolver};
use crate::operations::{
    CachedResult, ExplainRequest, ExplainResult, GenerateRequest, GenerateResult,
    ImproveRequest, ImproveResult, Operation, split_code_and_prose,
};
use crate::parser::{parse_explanation, parse_improvement};
use crate::pipeline::{
    ApiRequest, ApiResponse, CorsConfig, CorsMiddleware, Handler, LoggingMiddleware, Middleware,
    Pipeline, RateLimitMiddleware,
};
use crate::pricing::{DEFAULT_MODEL, PricingTable, calculate_cost};
use crate::providers::{ChatProvider, DEFAULT_STREAM_BUFFER, bounded_stream};
use crate::ratelimit::{RateLimitConfig, RateLimiter};
use crate::stream::{CompletionHook, FrameStream, StreamSummary, frame_stream};
use crate::types::{ChatOptions, Message, Usage};
use crate::usage::{PlanLookup, UsageAggregator};
use crate::{MimirError, Result, telemetry};

/// Coordinates the subsystems for each operation.
pub struct Orchestrator {
    provider: Arc<dyn ChatProvider>,
    identity: Arc<dyn IdentityResolver>,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    usage: UsageAggregator,
    plans: Option<Arc<dyn PlanLookup>>,
    pricing: Arc<PricingTable>,
    options: ChatOptions,
    cors: CorsConfig,
    stream_buffer: usize,
}

impl Orchestrator {
    /// Start building an orchestrator around a provider.
    pub fn builder(provider: Arc<dyn ChatProvider>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(provider)
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn usage(&self) -> &UsageAggregator {
        &self.usage
    }

    pub fn options(&self) -> &ChatOptions {
        &self.options
    }

    /// Generate code, buffered.
    pub async fn generate(&self, identity: &str, request: &GenerateRequest) -> Result<GenerateResult> {
        let key = CacheKey::new(Operation::Generate.as_str(), &request.cache_params());
        let language = request.language.clone();
        self.run_buffered(identity, key, request.messages(), move |text, usage, cost| {
            let (code, explanation) = split_code_and_prose(&text);
            GenerateResult {
                code,
                explanation,
                language,
                usage,
                cost,
                cached: false,
            }
        })
        .await
    }

    /// Generate code as a frame stream. Streams bypass the cache.
    pub async fn generate_stream(
        &self,
        identity: &str,
        request: &GenerateRequest,
    ) -> Result<FrameStream> {
        self.enforce_quota(identity).await?;

        let messages = request.messages();
        let upstream = self.provider.chat_stream(&messages, &self.options).await?;
        let upstream = bounded_stream(upstream, self.stream_buffer);

        let hook = self.completion_hook(Operation::Generate, identity, &messages);
        Ok(frame_stream(upstream, Some(hook)))
    }

    /// Explain a piece of code.
    pub async fn explain(&self, identity: &str, request: &ExplainRequest) -> Result<ExplainResult> {
        let key = CacheKey::new(Operation::Explain.as_str(), &request.cache_params());
        let language = request.language();
        self.run_buffered(identity, key, request.messages(), move |text, usage, cost| {
            ExplainResult {
                explanation: parse_explanation(&text),
                language,
                usage,
                cost,
                cached: false,
            }
        })
        .await
    }

    /// Review and improve a piece of code.
    pub async fn improve(&self, identity: &str, request: &ImproveRequest) -> Result<ImproveResult> {
        let key = CacheKey::new(Operation::Improve.as_str(), &request.cache_params());
        let language = request.language();
        self.run_buffered(identity, key, request.messages(), move |text, usage, cost| {
            ImproveResult {
                improvement: parse_improvement(&text),
                language,
                usage,
                cost,
                cached: false,
            }
        })
        .await
    }

    /// Middleware pipeline (logging, CORS, rate limit) around one operation.
    pub fn pipeline(self: &Arc<Self>, operation: Operation) -> Pipeline {
        let middlewares: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(LoggingMiddleware),
            Arc::new(CorsMiddleware::new(self.cors.clone())),
            Arc::new(RateLimitMiddleware::new(
                self.limiter.clone(),
                self.identity.clone(),
            )),
        ];
        Pipeline::compose(
            middlewares,
            Arc::new(OperationHandler::new(self.clone(), operation)),
        )
    }

    /// Route a request by its last path segment and run it through the pipeline.
    pub async fn handle(self: &Arc<Self>, request: ApiRequest) -> ApiResponse {
        let operation = match request.operation() {
            "generate" => Operation::Generate,
            "explain" => Operation::Explain,
            "improve" => Operation::Improve,
            other => {
                debug!(path = %request.path, operation = other, "unknown operation");
                return ApiResponse::failure(http::StatusCode::NOT_FOUND, "Not found", None);
            }
        };
        self.pipeline(operation).execute(request).await
    }

    /// Resolve the caller identity for a request, or fail with 401.
    pub async fn resolve_identity(&self, request: &ApiRequest) -> Result<String> {
        if let Some(ref id) = request.identity {
            return Ok(id.clone());
        }
        self.identity
            .resolve(&request.headers)
            .await?
            .ok_or(MimirError::Unauthenticated)
    }

    async fn run_buffered<R, F>(
        &self,
        identity: &str,
        key: CacheKey,
        messages: Vec<Message>,
        build: F,
    ) -> Result<R>
    where
        R: CachedResult,
        F: FnOnce(String, Usage, f64) -> R + Send,
    {
        if let Some(mut hit) = self.cache.get_json::<R>(&key).await {
            hit.mark_cached();
            return Ok(hit);
        }

        self.enforce_quota(identity).await?;

        let response = self.provider.chat(&messages, &self.options).await?;
        let usage = response.usage.unwrap_or_default();
        let model = response.model.as_deref().unwrap_or(&self.options.model);
        let cost = calculate_cost(
            &self.pricing,
            model,
            usage.prompt_tokens,
            usage.completion_tokens,
        );

        let result = build(response.content, usage, cost);
        if let Err(e) = self.cache.put_json(&key, &result).await {
            warn!(key = %key, error = %e, "failed to cache result");
        }
        record_usage(&self.usage, key.operation(), identity, usage, cost).await;
        Ok(result)
    }

    /// Deny the call when the identity has used up its monthly tokens.
    ///
    /// Without a plan lookup there is no quota. Lookup or storage failures
    /// let the request through.
    async fn enforce_quota(&self, identity: &str) -> Result<()> {
        let Some(ref plans) = self.plans else {
            return Ok(());
        };
        let limit = match plans.monthly_token_limit(identity).await {
            Ok(limit) => limit,
            Err(e) => {
                warn!(identity, error = %e, "plan lookup failed, skipping quota check");
                return Ok(());
            }
        };
        match self.usage.quota(identity, limit, Utc::now()).await {
            Ok(quota) if quota.exceeded => {
                warn!(identity, used = quota.used, limit, "monthly quota exceeded");
                Err(MimirError::QuotaExceeded {
                    used: quota.used,
                    limit,
                })
            }
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(identity, error = %e, "quota check failed, allowing request");
                Ok(())
            }
        }
    }

    /// Hook that prices and records a stream once it completes normally.
    ///
    /// Backends that report no counts for streams are billed from an estimate
    /// over the prompt and the streamed content.
    fn completion_hook(
        &self,
        operation: Operation,
        identity: &str,
        messages: &[Message],
    ) -> CompletionHook {
        let aggregator = self.usage.clone();
        let pricing = self.pricing.clone();
        let model = self.options.model.clone();
        let identity = identity.to_string();
        let prompt = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Box::new(move |summary: StreamSummary| {
            async move {
                let usage = summary.usage.unwrap_or_else(|| {
                    debug!(operation = operation.as_str(), "no usage reported, estimating");
                    Usage::estimate(&prompt, &summary.content)
                });
                let cost = calculate_cost(
                    &pricing,
                    &model,
                    usage.prompt_tokens,
                    usage.completion_tokens,
                );
                debug!(
                    operation = operation.as_str(),
                    chars = summary.content.len(),
                    "stream completed"
                );
                record_usage(&aggregator, operation.as_str(), &identity, usage, cost).await;
            }
            .boxed()
        })
    }
}

/// Record usage and emit token/cost metrics. Failures are logged and dropped.
async fn record_usage(
    aggregator: &UsageAggregator,
    operation: &str,
    identity: &str,
    usage: Usage,
    cost: f64,
) {
    metrics::counter!(telemetry::TOKENS_TOTAL, "direction" => "prompt")
        .increment(u64::from(usage.prompt_tokens));
    metrics::counter!(telemetry::TOKENS_TOTAL, "direction" => "completion")
        .increment(u64::from(usage.completion_tokens));
    metrics::counter!(telemetry::COST_MICRO_USD_TOTAL).increment((cost * 1e6).round() as u64);

    if let Err(e) = aggregator
        .record(identity, u64::from(usage.total_tokens), cost, Utc::now())
        .await
    {
        metrics::counter!(telemetry::USAGE_RECORD_FAILURES_TOTAL).increment(1);
        warn!(operation, identity, error = %e, "failed to record usage");
    }
}

/// Terminal handler for one operation: validate, resolve identity, dispatch.
pub struct OperationHandler {
    orchestrator: Arc<Orchestrator>,
    operation: Operation,
}

impl OperationHandler {
    pub fn new(orchestrator: Arc<Orchestrator>, operation: Operation) -> Self {
        Self {
            orchestrator,
            operation,
        }
    }

    async fn dispatch(&self, request: ApiRequest) -> Result<ApiResponse> {
        let o = &self.orchestrator;
        match self.operation {
            Operation::Generate => {
                let body = GenerateRequest::from_body(&request.body)?;
                let identity = o.resolve_identity(&request).await?;
                if body.is_stream() {
                    Ok(ApiResponse::stream(o.generate_stream(&identity, &body).await?))
                } else {
                    success(&o.generate(&identity, &body).await?)
                }
            }
            Operation::Explain => {
                let body = ExplainRequest::from_body(&request.body)?;
                let identity = o.resolve_identity(&request).await?;
                success(&o.explain(&identity, &body).await?)
            }
            Operation::Improve => {
                let body = ImproveRequest::from_body(&request.body)?;
                let identity = o.resolve_identity(&request).await?;
                success(&o.improve(&identity, &body).await?)
            }
        }
    }
}

fn success<T: serde::Serialize>(result: &T) -> Result<ApiResponse> {
    Ok(ApiResponse::success(serde_json::to_value(result)?))
}

#[async_trait]
impl Handler for OperationHandler {
    async fn handle(&self, request: ApiRequest) -> Result<ApiResponse> {
        let result = self.dispatch(request).await;
        let status = match &result {
            Ok(response) => response.status,
            Err(e) => e.status(),
        };
        metrics::counter!(
            telemetry::REQUESTS_TOTAL,
            "operation" => self.operation.as_str(),
            "status" => status.as_u16().to_string()
        )
        .increment(1);
        match &result {
            Ok(_) => info!(operation = self.operation.as_str(), "operation completed"),
            Err(e) if e.status().is_server_error() => {
                warn!(operation = self.operation.as_str(), error = %e, "operation failed")
            }
            Err(e) => debug!(operation = self.operation.as_str(), error = %e, "operation rejected"),
        }
        result
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    provider: Arc<dyn ChatProvider>,
    identity: Arc<dyn IdentityResolver>,
    limiter: Option<Arc<RateLimiter>>,
    rate_limit: RateLimitConfig,
    cache: Option<Arc<ResponseCache>>,
    cache_config: CacheConfig,
    usage: Option<UsageAggregator>,
    plans: Option<Arc<dyn PlanLookup>>,
    pricing: PricingTable,
    options: ChatOptions,
    cors: CorsConfig,
    stream_buffer: usize,
}

impl OrchestratorBuilder {
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self {
            provider,
            identity: Arc::new(BearerIdentity),
            limiter: None,
            rate_limit: RateLimitConfig::default(),
            cache: None,
            cache_config: CacheConfig::default(),
            usage: None,
            plans: None,
            pricing: PricingTable::new(),
            options: ChatOptions::new(DEFAULT_MODEL),
            cors: CorsConfig::default(),
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }

    /// Identity resolver (default: bearer token).
    pub fn identity(mut self, resolver: Arc<dyn IdentityResolver>) -> Self {
        self.identity = resolver;
        self
    }

    /// Rate limiter configuration, used unless a limiter is supplied.
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = config;
        self
    }

    /// Share an existing rate limiter.
    pub fn limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Cache configuration, used unless a cache is supplied.
    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    /// Share an existing response cache.
    pub fn cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Usage aggregator (default: in-memory).
    pub fn usage(mut self, usage: UsageAggregator) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Enable quota enforcement with the given plan lookup.
    pub fn plans(mut self, plans: Arc<dyn PlanLookup>) -> Self {
        self.plans = Some(plans);
        self
    }

    pub fn pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = pricing;
        self
    }

    /// Provider call options (model, temperature, max tokens).
    pub fn options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    pub fn cors(mut self, cors: CorsConfig) -> Self {
        self.cors = cors;
        self
    }

    /// Events buffered between a streaming provider and the caller.
    pub fn stream_buffer(mut self, size: usize) -> Self {
        self.stream_buffer = size.max(1);
        self
    }

    pub fn build(self) -> Orchestrator {
        Orchestrator {
            provider: self.provider,
            identity: self.identity,
            limiter: self
                .limiter
                .unwrap_or_else(|| Arc::new(RateLimiter::new(self.rate_limit))),
            cache: self
                .cache
                .unwrap_or_else(|| Arc::new(ResponseCache::new(&self.cache_config))),
            usage: self.usage.unwrap_or_else(UsageAggregator::in_memory),
            plans: self.plans,
            pricing: Arc::new(self.pricing),
            options: self.options,
            cors: self.cors,
            stream_buffer: self.stream_buffer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::EventStream;
    use crate::types::{ChatEvent, ChatResponse};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Canned {
        text: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatProvider for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        async fn chat(&self, _messages: &[Message], options: &ChatOptions) -> Result<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ChatResponse {
                content: self.text.to_string(),
                usage: Some(Usage::new(1000, 1000)),
                model: Some(options.model.clone()),
            })
        }

        async fn chat_stream(
            &self,
            _messages: &[Message],
            _options: &ChatOptions,
        ) -> Result<EventStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Box::pin(futures_util::stream::iter(vec![
                Ok(ChatEvent::Content(self.text.to_string())),
                Ok(ChatEvent::Done),
            ])))
        }
    }

    fn orchestrator(text: &'static str) -> (Orchestrator, Arc<Canned>) {
        let provider = Arc::new(Canned {
            text,
            calls: AtomicUsize::new(0),
        });
        (Orchestrator::builder(provider.clone()).build(), provider)
    }

    #[tokio::test]
    async fn second_identical_call_is_cached() {
        let (o, provider) = orchestrator("## Overview\nAdds numbers.");
        let req = ExplainRequest {
            code: "fn add() {}".into(),
            language: None,
        };
        let first = o.explain("u1", &req).await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.cost, 0.018);
        let second = o.explain("u1", &req).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.explanation, first.explanation);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn generate_splits_code_and_prose() {
        let (o, _) = orchestrator("```python\nprint(1)\n```\nPrints one.");
        let req = GenerateRequest {
            description: "print one".into(),
            language: "python".into(),
            ..Default::default()
        };
        let result = o.generate("u1", &req).await.unwrap();
        assert_eq!(result.code, "print(1)");
        assert_eq!(result.explanation, "Prints one.");
        assert_eq!(result.usage.total_tokens, 2000);
    }
}
