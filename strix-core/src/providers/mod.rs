//! LLM provider integration

#[macro_use]
mod macros;

pub mod definitions;
pub mod factory;
pub mod parsing;
pub mod reasoning;
pub mod request_queue;
pub mod retry;
pub mod traits;

pub use definitions::{AnthropicProvider, OpenAiProvider};
pub use factory::create_provider;
pub use parsing::{
    clean_content, format_tool_call, parse_tool_invocations, truncate_to_first_function,
    ToolInvocation,
};
pub use reasoning::{Decision, LlmReasoningClient, ReasoningClient};
pub use request_queue::{RequestQueue, RequestSlot};
pub use retry::{build_backoff, is_retriable_error, should_retry, RetryConfig};
pub use traits::{
    CompletionRequest, CompletionResponse, LlmProvider, Message, Role, TokenUsage, ToolCall,
    ToolDefinition, DEFAULT_MAX_TOKENS,
};

/// Flatten a conversation into one prompt for completion APIs that take a single user turn
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| match m.role {
            Role::Assistant => format!("[assistant]\n{}", m.content),
            _ => m.content.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
