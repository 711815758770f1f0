//! Reasoning client: turns a conversation into the agent's next action

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use tracing::{debug, warn};

use super::parsing::clean_content;
use super::request_queue::RequestQueue;
use super::retry::{build_backoff, should_retry, RetryConfig};
use super::traits::{CompletionRequest, LlmProvider, TokenUsage};
use crate::agents::{Action, ConversationContext};
use crate::config::RunConfig;
use crate::{Error, Result};

/// The action chosen by one reasoning call
#[derive(Debug, Clone)]
pub struct Decision {
    pub action: Action,
    /// Model prose with tool-call markup removed
    pub thought: String,
    /// Full response text, replayed into the conversation
    pub raw: String,
    pub usage: TokenUsage,
}

/// Opaque "decide the next action" call
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn decide(&self, context: &ConversationContext) -> Result<Decision>;
}

/// Reasoning client backed by an LLM provider, with rate limiting and retry
pub struct LlmReasoningClient {
    provider: Arc<dyn LlmProvider>,
    queue: Arc<RequestQueue>,
    retry: RetryConfig,
    request_timeout: Duration,
    max_tokens: u64,
}

impl LlmReasoningClient {
    pub fn new(provider: Arc<dyn LlmProvider>, queue: Arc<RequestQueue>) -> Self {
        Self {
            provider,
            queue,
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(300),
            max_tokens: 8192,
        }
    }

    pub fn from_config(provider: Arc<dyn LlmProvider>, config: &RunConfig) -> Self {
        Self {
            provider,
            queue: Arc::new(RequestQueue::from_config(&config.rate_limit)),
            retry: config.retry.clone(),
            request_timeout: Duration::from_secs(config.provider.request_timeout_secs),
            max_tokens: config.provider.max_tokens,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    async fn complete_once(&self, request: &CompletionRequest) -> Result<super::CompletionResponse> {
        let _slot = self.queue.acquire().await;
        match tokio::time::timeout(self.request_timeout, self.provider.complete(request.clone()))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "{} request exceeded {}s",
                self.provider.name(),
                self.request_timeout.as_secs()
            ))),
        }
    }
}

#[async_trait]
impl ReasoningClient for LlmReasoningClient {
    async fn decide(&self, context: &ConversationContext) -> Result<Decision> {
        let request = CompletionRequest::new(context.messages.clone())
            .with_system(context.system_prompt.clone())
            .with_tools(context.tools.clone())
            .with_max_tokens(self.max_tokens);

        let response = (|| self.complete_once(&request))
            .retry(build_backoff(&self.retry))
            .when(should_retry)
            .notify(|err, delay| {
                warn!(
                    agent = %context.agent_id,
                    provider = self.provider.name(),
                    error = %err,
                    "Reasoning call failed, retrying in {:?}",
                    delay
                );
            })
            .await?;

        let raw = response.content.clone().unwrap_or_default();
        let action = Action::decode(&response)?;
        debug!(agent = %context.agent_id, action = action.tool_name(), "Decided next action");

        Ok(Decision {
            action,
            thought: clean_content(&raw),
            raw,
            usage: response.usage,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::agents::AgentId;
    use crate::providers::{CompletionResponse, Message};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Provider that replays a fixed list of outcomes
    struct ScriptedProvider {
        outcomes: Mutex<Vec<Result<String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(mut outcomes: Vec<Result<String>>) -> Self {
            outcomes.reverse();
            Self {
                outcomes: Mutex::new(outcomes),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-1"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.outcomes.lock().unwrap().pop();
            match next {
                Some(Ok(text)) => Ok(CompletionResponse::text(text)),
                Some(Err(e)) => Err(e),
                None => Err(Error::Provider("script exhausted".to_string())),
            }
        }
    }

    fn context() -> ConversationContext {
        ConversationContext {
            agent_id: AgentId::from("agent_test"),
            agent_name: "test".to_string(),
            system_prompt: "system".to_string(),
            messages: vec![Message::user("go")],
            tools: vec![],
            steps_remaining: 10,
        }
    }

    fn client(provider: Arc<ScriptedProvider>) -> LlmReasoningClient {
        LlmReasoningClient::new(provider, Arc::new(RequestQueue::unlimited())).with_retry(
            RetryConfig {
                max_retries: 2,
                initial_delay_ms: 10,
                max_delay_ms: 100,
                factor: 2.0,
                jitter: false,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(Error::Provider("HTTP 503 Service Unavailable".to_string())),
            Ok("Checking.\n<function=terminal_execute><parameter=command>id</parameter></function>"
                .to_string()),
        ]));

        let decision = client(Arc::clone(&provider)).decide(&context()).await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(decision.thought, "Checking.");
        assert!(matches!(decision.action, Action::ToolCall { ref name, .. } if name == "terminal_execute"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_errors_are_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(Error::Provider(
            "401 invalid api key".to_string(),
        ))]));

        let err = client(Arc::clone(&provider)).decide(&context()).await.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_stop_at_ceiling() {
        let provider = Arc::new(ScriptedProvider::new(
            (0..5)
                .map(|_| Err(Error::Provider("rate limit exceeded".to_string())))
                .collect(),
        ));

        let err = client(Arc::clone(&provider)).decide(&context()).await.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
        // one attempt plus two retries
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prose_only_response_is_malformed() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok("All done.".to_string())]));
        let err = client(provider).decide(&context()).await.unwrap_err();
        assert!(matches!(err, Error::MalformedAction(_)));
    }
}
