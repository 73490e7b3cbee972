//! Provider trait for the external LLM.
//!
//! mimir talks to exactly one capability of a provider: chat completion,
//! either buffered or streamed. Implementations map their own failures onto
//! [`MimirError`](crate::MimirError); in particular an upstream throttle must
//! surface as `ProviderRateLimited` so callers can tell it apart from the
//! local rate limiter.

use async_trait::async_trait;

use crate::Result;
use crate::stream::EventStream;
use crate::types::{ChatOptions, ChatResponse, Message};

/// Provider for chat completion.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider name for logging/debugging.
    fn name(&self) -> &str;

    /// Non-streaming chat completion.
    async fn chat(&self, messages: &[Message], options: &ChatOptions) -> Result<ChatResponse>;

    /// Streaming chat completion.
    async fn chat_stream(&self, messages: &[Message], options: &ChatOptions)
    -> Result<EventStream>;
}
