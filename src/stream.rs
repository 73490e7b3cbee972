//! Framing of provider token streams for incremental delivery.
//!
//! [`frame_stream`] pulls [`ChatEvent`]s from a provider stream and yields
//! [`StreamFrame`]s: one `Data` frame per content fragment, then a single
//! terminal frame. Normal completion ends with `Done`; a provider failure
//! ends with one `Error` frame. Either way the frame stream finishes, so the
//! transport is never left half-open.
//!
//! The adapter is transport-agnostic; [`StreamFrame::to_sse`] renders the
//! server-sent-events framing. Dropping the frame stream drops the upstream
//! provider stream with it, and an optional completion hook runs only when
//! the provider finished normally.

use std::pin::Pin;

use futures_util::future::BoxFuture;
use futures_util::{Stream, StreamExt};
use serde_json::json;
use tracing::warn;

use crate::Result;
use crate::types::{ChatEvent, Usage};

/// Boxed provider event stream.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ChatEvent>> + Send>>;

/// Boxed outbound frame stream.
pub type FrameStream = Pin<Box<dyn Stream<Item = StreamFrame> + Send>>;

/// Callback run after a stream completes normally, before the `Done` frame.
pub type CompletionHook = Box<dyn FnOnce(StreamSummary) -> BoxFuture<'static, ()> + Send>;

/// One outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// A content fragment.
    Data { content: String },
    /// Normal end of stream.
    Done,
    /// Provider failure; always the last frame.
    Error { error: String },
}

impl StreamFrame {
    pub fn data(content: impl Into<String>) -> Self {
        StreamFrame::Data {
            content: content.into(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        StreamFrame::Error {
            error: error.into(),
        }
    }

    /// Whether this frame ends the stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamFrame::Data { .. })
    }

    /// Render as a server-sent-events frame.
    pub fn to_sse(&self) -> String {
        match self {
            StreamFrame::Data { content } => format!("data: {}\n\n", json!({ "content": content })),
            StreamFrame::Done => "data: [DONE]\n\n".to_string(),
            StreamFrame::Error { error } => format!("data: {}\n\n", json!({ "error": error })),
        }
    }
}

/// What a completed stream produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSummary {
    /// Concatenated content fragments.
    pub content: String,
    /// Usage reported by the provider, if any.
    pub usage: Option<Usage>,
}

/// Convert a provider event stream into framed output.
pub fn frame_stream(mut upstream: EventStream, on_complete: Option<CompletionHook>) -> FrameStream {
    Box::pin(async_stream::stream! {
        let mut summary = StreamSummary::default();
        loop {
            match upstream.next().await {
                Some(Ok(ChatEvent::Content(fragment))) => {
                    summary.content.push_str(&fragment);
                    yield StreamFrame::data(fragment);
                }
                Some(Ok(ChatEvent::Usage(usage))) => summary.usage = Some(usage),
                Some(Ok(ChatEvent::Done)) | None => break,
                Some(Err(e)) => {
                    warn!(error = %e, "provider stream failed");
                    yield StreamFrame::error(e.public_message());
                    return;
                }
            }
        }
        if let Some(hook) = on_complete {
            hook(summary).await;
        }
        yield StreamFrame::Done;
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_rendering() {
        assert_eq!(
            StreamFrame::data("hi \"there\"").to_sse(),
            "data: {\"content\":\"hi \\\"there\\\"\"}\n\n"
        );
        assert_eq!(StreamFrame::Done.to_sse(), "data: [DONE]\n\n");
        assert_eq!(
            StreamFrame::error("boom").to_sse(),
            "data: {\"error\":\"boom\"}\n\n"
        );
    }

    #[test]
    fn terminal_frames() {
        assert!(!StreamFrame::data("x").is_terminal());
        assert!(StreamFrame::Done.is_terminal());
        assert!(StreamFrame::error("x").is_terminal());
    }
}
