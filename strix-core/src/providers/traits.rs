//! The provider seam: one transcript in, one reply out

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Default completion budget per reasoning call
pub const DEFAULT_MAX_TOKENS: u64 = 8192;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
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

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A tool as advertised to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: serde_json::Value,
}

/// A structured tool call, for providers that return them natively
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments
    pub arguments: String,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub system: Option<String>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: u64,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            system: None,
            tools: Vec::new(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Reply text; tool invocations may be embedded in it
    pub content: Option<String>,
    /// Structured calls, which take precedence over the text format
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
}

impl CompletionResponse {
    /// Plain text reply with no structured tool calls
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            usage: TokenUsage::default(),
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Rough count at four bytes per token, for APIs that do not report usage
    pub fn estimate(prompt: &str, reply: &str) -> Self {
        Self {
            input_tokens: prompt.len() as u64 / 4,
            output_tokens: reply.len() as u64 / 4,
        }
    }
}

/// A reasoning backend.
///
/// Implementations do not retry, rate-limit or time out on their own; the
/// reasoning client wrapped around them does.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider label used in logs
    fn name(&self) -> &str;

    /// Model identifier the provider was built for
    fn model(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_and_builders() {
        let request = CompletionRequest::new(vec![Message::user("scan shop.test")])
            .with_system("You are a penetration tester")
            .with_max_tokens(1000);

        assert_eq!(request.messages[0].role, Role::User);
        assert_eq!(request.system.as_deref(), Some("You are a penetration tester"));
        assert_eq!(request.max_tokens, 1000);
        assert!(request.tools.is_empty());
        assert_eq!(
            CompletionRequest::new(vec![]).max_tokens,
            DEFAULT_MAX_TOKENS
        );
    }

    #[test]
    fn test_usage_estimate() {
        let usage = TokenUsage::estimate(&"a".repeat(400), "12345678");
        assert_eq!(usage.input_tokens, 100);
        assert_eq!(usage.output_tokens, 2);

        let response = CompletionResponse::text("ok").with_usage(usage);
        assert_eq!(response.usage, usage);
        assert!(response.tool_calls.is_empty());
    }
}
