//! `completion_provider!` builds a rig-backed [`LlmProvider`](super::LlmProvider).
//!
//! Tool invocations travel inside the completion text as `<function=...>`
//! blocks, so a provider only has to turn a transcript into one prompt and
//! hand back the reply. Token usage is estimated from text length; the agent
//! runner is what records it.

/// Generate a provider struct with `from_env`/`connect` constructors and its
/// `LlmProvider` impl.
///
/// `base_url` receives the rig client builder and an optional gateway URL and
/// returns the builder to use.
///
/// ```ignore
/// completion_provider! {
///     AnthropicProvider,
///     label: "anthropic",
///     client: anthropic::Client,
///     key_env: "ANTHROPIC_API_KEY",
///     base_url: |builder, _url| builder
/// }
/// ```
#[macro_export]
macro_rules! completion_provider {
    (
        $name:ident,
        label: $label:expr,
        client: $client:ty,
        key_env: $key_env:expr,
        base_url: |$builder:ident, $url:ident| $apply_url:expr
    ) => {
        pub struct $name {
            client: $client,
            model: String,
        }

        impl $name {
            /// Read the API key from the provider's environment variable
            pub fn from_env(model: impl Into<String>) -> $crate::Result<Self> {
                let api_key = std::env::var($key_env)
                    .map_err(|_| $crate::Error::Provider(format!("{} not set", $key_env)))?;
                Self::connect(api_key, None, model)
            }

            /// Build a client for `model`, optionally through a compatible gateway
            pub fn connect(
                api_key: impl Into<String>,
                base_url: Option<&str>,
                model: impl Into<String>,
            ) -> $crate::Result<Self> {
                let $builder = <$client>::builder().api_key(api_key.into());
                let $url: Option<&str> = base_url;
                let client = $apply_url.build().map_err(|e| {
                    $crate::Error::Provider(format!("cannot build {} client: {}", $label, e))
                })?;
                Ok(Self {
                    client,
                    model: model.into(),
                })
            }
        }

        #[async_trait::async_trait]
        impl $crate::providers::LlmProvider for $name {
            fn name(&self) -> &str {
                $label
            }

            fn model(&self) -> &str {
                &self.model
            }

            async fn complete(
                &self,
                request: $crate::providers::CompletionRequest,
            ) -> $crate::Result<$crate::providers::CompletionResponse> {
                use rig::client::CompletionClient;
                use rig::completion::Prompt;

                let transcript = $crate::providers::render_transcript(&request.messages);
                let agent = self
                    .client
                    .agent(&self.model)
                    .preamble(request.system.as_deref().unwrap_or_default())
                    .max_tokens(request.max_tokens)
                    .build();

                let reply = agent.prompt(transcript.as_str()).await.map_err(|e| {
                    $crate::Error::Provider(format!("{} completion failed: {}", $label, e))
                })?;

                let usage = $crate::providers::TokenUsage::estimate(&transcript, &reply);
                Ok($crate::providers::CompletionResponse::text(reply).with_usage(usage))
            }
        }
    };
}
