//! Provider-facing types shared across mimir.
//!
//! Operations render their prompt templates into [`Message`]s, call a
//! [`ChatProvider`](crate::ChatProvider) with [`ChatOptions`], and get back
//! either a buffered [`ChatResponse`] or a stream of [`ChatEvent`]s. Token
//! counts travel as [`Usage`] into pricing and quota accounting.

use serde::{Deserialize, Serialize};

/// Who a prompt message speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions; several are joined into one system prompt.
    System,
    User,
    Assistant,
}

/// One message of a rendered prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }
}

/// Model and sampling settings applied to every provider call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatOptions {
    /// Model id; also selects the pricing entry.
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

impl ChatOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn max_tokens(mut self, max: usize) -> Self {
        self.max_tokens = Some(max);
        self
    }
}

/// Buffered provider reply.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    /// Absent when the backend reports no counts; billed as zero.
    pub usage: Option<Usage>,
    /// Model that actually served the call, when the backend says.
    pub model: Option<String>,
}

/// Streaming provider event.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Text fragment, forwarded to the caller as one data frame.
    Content(String),
    /// Token counts, usually just before the end.
    Usage(Usage),
    Done,
}

/// Token counts for one provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    /// Counts with `total_tokens` derived from the parts.
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }

    /// Approximate counts for a call the backend did not meter.
    pub fn estimate(prompt: &str, completion: &str) -> Self {
        Self::new(estimate_tokens(prompt), estimate_tokens(completion))
    }
}

/// Characters per token assumed when estimating.
const CHARS_PER_TOKEN: usize = 4;

/// Rough token count of `text`, rounded up.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(CHARS_PER_TOKEN)).unwrap_or(u32::MAX)
}
