//! LLM provider abstraction and implementations.

pub mod backpressure;
pub mod llm_chat;
pub mod traits;

pub use backpressure::{DEFAULT_STREAM_BUFFER, bounded_stream};
pub use llm_chat::LlmChatProvider;
pub use traits::ChatProvider;
