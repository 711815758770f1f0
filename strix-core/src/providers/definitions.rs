//! Concrete providers
//!
//! - Anthropic, keyed by `ANTHROPIC_API_KEY`
//! - OpenAI and OpenAI-compatible gateways, keyed by `OPENAI_API_KEY`

use rig::providers::{anthropic, openai};

completion_provider! {
    AnthropicProvider,
    label: "anthropic",
    client: anthropic::Client,
    key_env: "ANTHROPIC_API_KEY",
    base_url: |builder, _url| builder
}

completion_provider! {
    OpenAiProvider,
    label: "openai",
    client: openai::Client,
    key_env: "OPENAI_API_KEY",
    base_url: |builder, url| match url {
        Some(url) => builder.base_url(url),
        None => builder,
    }
}
