//! Mimir error types

use std::time::Duration;

use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::Serialize;

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Mimir error types
#[derive(Debug, thiserror::Error)]
pub enum MimirError {
    // Caller errors
    #[error("invalid request")]
    Validation(Vec<FieldError>),

    #[error("authentication required")]
    Unauthenticated,

    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimited {
        limit: u32,
        reset_at: DateTime<Utc>,
        retry_after: Duration,
    },

    #[error("monthly token quota exceeded ({used}/{limit})")]
    QuotaExceeded { used: u64, limit: u64 },

    // Provider/network errors
    #[error("AI service is busy, please try again later")]
    ProviderRateLimited { retry_after: Option<Duration> },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("stream error: {0}")]
    Stream(String),

    #[error("provider error: {0}")]
    Provider(String),

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),

    // Configuration errors
    #[error("no provider configured")]
    NoProvider,

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl MimirError {
    /// Shorthand for a validation error on a single field.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        MimirError::Validation(vec![FieldError::new(field, message)])
    }

    /// HTTP status code surfaced to the caller for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            MimirError::Validation(_) | MimirError::Json(_) => StatusCode::BAD_REQUEST,
            MimirError::Unauthenticated => StatusCode::UNAUTHORIZED,
            MimirError::RateLimited { .. }
            | MimirError::QuotaExceeded { .. }
            | MimirError::ProviderRateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the caller. Internal failures are not echoed verbatim.
    pub fn public_message(&self) -> String {
        match self {
            MimirError::Validation(_) | MimirError::Json(_) => "Invalid request".to_string(),
            MimirError::Unauthenticated => "Unauthorized".to_string(),
            MimirError::RateLimited { .. } => "Too many requests".to_string(),
            MimirError::QuotaExceeded { .. } | MimirError::ProviderRateLimited { .. } => {
                self.to_string()
            }
            _ => "Internal server error".to_string(),
        }
    }

    /// Structured detail attached to the error body, if any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            MimirError::Validation(fields) => serde_json::to_value(fields).ok(),
            MimirError::Json(e) => Some(serde_json::Value::String(e.to_string())),
            MimirError::RateLimited {
                limit, reset_at, ..
            } => Some(serde_json::json!({
                "limit": limit,
                "reset": reset_at.to_rfc3339(),
            })),
            MimirError::QuotaExceeded { used, limit } => Some(serde_json::json!({
                "used": used,
                "limit": limit,
            })),
            _ => None,
        }
    }

    /// Retry hint carried by rate-limit errors.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            MimirError::RateLimited { retry_after, .. } => Some(*retry_after),
            MimirError::ProviderRateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<llm::error::LLMError> for MimirError {
    fn from(err: llm::error::LLMError) -> Self {
        // Map llm errors to our error types
        let msg = err.to_string();
        let lower = msg.to_lowercase();
        if lower.contains("rate limit") || lower.contains("429") {
            MimirError::ProviderRateLimited { retry_after: None }
        } else if lower.contains("authentication")
            || lower.contains("401")
            || lower.contains("invalid api key")
        {
            MimirError::Api {
                status: 401,
                message: msg,
            }
        } else {
            MimirError::Provider(msg)
        }
    }
}

/// Result type alias for Mimir operations
pub type Result<T> = std::result::Result<T, MimirError>;
