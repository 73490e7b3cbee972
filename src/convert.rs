//! Conversions between mimir types and llm crate types.

use llm::chat::ChatMessage as LlmMessage;

use crate::types::{Message, Role, Usage};

/// Split our messages into the system prompt and llm crate messages.
///
/// The llm crate takes the system prompt on the builder, not in the message
/// list. If several system messages are present they are joined.
pub fn to_llm_messages(messages: &[Message]) -> (Option<String>, Vec<LlmMessage>) {
    let mut system: Vec<&str> = Vec::new();
    let mut llm_messages = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::System => system.push(&msg.content),
            Role::User => llm_messages.push(LlmMessage::user().content(msg.content.clone()).build()),
            Role::Assistant => {
                llm_messages.push(LlmMessage::assistant().content(msg.content.clone()).build())
            }
        }
    }

    let system_prompt = (!system.is_empty()).then(|| system.join("\n\n"));
    (system_prompt, llm_messages)
}

/// Convert llm crate usage to our format
pub fn from_llm_usage(usage: &llm::chat::Usage) -> Usage {
    Usage::new(usage.prompt_tokens, usage.completion_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_is_split_out() {
        let messages = vec![
            Message::system("be brief"),
            Message::user("hello"),
            Message::assistant("hi"),
        ];
        let (system, converted) = to_llm_messages(&messages);
        assert_eq!(system.as_deref(), Some("be brief"));
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[0].content, "hello");
    }

    #[test]
    fn no_system_prompt() {
        let (system, converted) = to_llm_messages(&[Message::user("x")]);
        assert!(system.is_none());
        assert_eq!(converted.len(), 1);
    }
}
