//! LLM crate wrapper implementing [`ChatProvider`].
//!
//! [`LlmChatProvider`] stores backend configuration and builds an llm
//! provider per request, since model, system prompt and sampling options are
//! fixed at build time in the llm crate.

use async_trait::async_trait;
use futures_util::StreamExt;
use llm::LLMProvider;
use llm::builder::{LLMBackend, LLMBuilder};
use tracing::instrument;

use crate::convert::{from_llm_usage, to_llm_messages};
use crate::stream::EventStream;
use crate::types::{ChatEvent, ChatOptions, ChatResponse, Message};
use crate::{MimirError, Result};

use super::traits::ChatProvider;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Wraps llm crate provider configuration to implement [`ChatProvider`].
///
/// # Example
///
/// ```ignore
/// use llm::builder::LLMBackend;
/// use mimir::providers::LlmChatProvider;
///
/// let provider = LlmChatProvider::new(LLMBackend::Anthropic, Some("your-key"), "anthropic");
/// ```
pub struct LlmChatProvider {
    backend: LLMBackend,
    api_key: Option<String>,
    name: String,
    /// Base URL override (Ollama, proxies)
    base_url: Option<String>,
    timeout_secs: u64,
}

impl LlmChatProvider {
    /// Create a new provider for `backend`.
    ///
    /// * `api_key` - API key for the backend (`None` for keyless access)
    /// * `name` - Human-readable name for logging (e.g. "anthropic")
    pub fn new(
        backend: LLMBackend,
        api_key: Option<impl Into<String>>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            api_key: api_key.map(|k| k.into()),
            name: name.into(),
            base_url: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Override the backend base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the timeout in seconds.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn build_provider(
        &self,
        options: &ChatOptions,
        system_prompt: Option<&str>,
    ) -> Result<Box<dyn LLMProvider>> {
        let mut builder = LLMBuilder::new()
            .backend(self.backend.clone())
            .model(&options.model)
            .timeout_seconds(self.timeout_secs);
        if let Some(ref key) = self.api_key {
            builder = builder.api_key(key);
        }
        if let Some(sys) = system_prompt {
            builder = builder.system(sys);
        }
        if let Some(temp) = options.temperature {
            builder = builder.temperature(temp);
        }
        if let Some(max) = options.max_tokens {
            builder = builder.max_tokens(max as u32);
        }
        if let Some(ref url) = self.base_url {
            builder = builder.base_url(url.clone());
        }

        builder
            .build()
            .map_err(|e| MimirError::Configuration(e.to_string()))
    }
}

#[async_trait]
impl ChatProvider for LlmChatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(name = "llm.chat", skip(self, messages, options), fields(model = %options.model, provider = %self.name))]
    async fn chat(&self, messages: &[Message], options: &ChatOptions) -> Result<ChatResponse> {
        let (system_prompt, llm_messages) = to_llm_messages(messages);
        let provider = self.build_provider(options, system_prompt.as_deref())?;

        let response = provider
            .chat(&llm_messages)
            .await
            .map_err(MimirError::from)?;

        Ok(ChatResponse {
            content: response.text().unwrap_or_default(),
            usage: response.usage().map(|u| from_llm_usage(&u)),
            model: Some(options.model.clone()),
        })
    }

    #[instrument(name = "llm.chat_stream", skip(self, messages, options), fields(model = %options.model, provider = %self.name))]
    async fn chat_stream(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<EventStream> {
        let (system_prompt, llm_messages) = to_llm_messages(messages);
        let provider = self.build_provider(options, system_prompt.as_deref())?;

        let stream = provider
            .chat_stream_with_tools(&llm_messages, None)
            .await
            .map_err(MimirError::from)?;

        // Only text and completion matter here; tool and thinking chunks are dropped.
        let converted = stream.filter_map(|result| async move {
            match result {
                Ok(llm::chat::StreamChunk::Text(text)) => Some(Ok(ChatEvent::Content(text))),
                Ok(llm::chat::StreamChunk::Done { .. }) => Some(Ok(ChatEvent::Done)),
                Ok(_) => None,
                Err(e) => Some(Err(MimirError::from(e))),
            }
        });

        Ok(Box::pin(converted))
    }
}
