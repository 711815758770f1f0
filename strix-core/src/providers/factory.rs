//! Builds the configured reasoning provider

use std::sync::Arc;

use tracing::debug;

use super::{AnthropicProvider, LlmProvider, OpenAiProvider};
use crate::config::{ProviderConfig, ProviderName};
use crate::{Error, Result};

/// Create a provider from configuration.
///
/// The model string selects the provider through its `provider/` prefix; the
/// configured API key wins over the provider's own environment variable.
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>> {
    let (provider, model) = ProviderName::split_model(&config.model);
    if model.is_empty() {
        return Err(Error::Config(format!(
            "model name missing in '{}'",
            config.model
        )));
    }
    let base_url = config.base_url.as_deref();

    let provider: Arc<dyn LlmProvider> = match (provider, config.api_key.as_deref()) {
        (ProviderName::Anthropic, Some(key)) => {
            Arc::new(AnthropicProvider::connect(key, base_url, model)?)
        }
        (ProviderName::Anthropic, None) => Arc::new(AnthropicProvider::from_env(model)?),
        (ProviderName::OpenAi, Some(key)) => Arc::new(OpenAiProvider::connect(key, base_url, model)?),
        (ProviderName::OpenAi, None) => {
            let key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| Error::Provider("OPENAI_API_KEY not set".to_string()))?;
            Arc::new(OpenAiProvider::connect(key, base_url, model)?)
        }
    };
    debug!(provider = provider.name(), model = provider.model(), "Reasoning provider ready");
    Ok(provider)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_name_rejected() {
        let config = ProviderConfig {
            model: "anthropic/".to_string(),
            ..ProviderConfig::default()
        };
        let result = create_provider(&config);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_create_openai_with_explicit_key() {
        let config = ProviderConfig {
            model: "openai/gpt-5".to_string(),
            api_key: Some("sk-test".to_string()),
            ..ProviderConfig::default()
        };
        let provider = create_provider(&config).expect("should build");
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.model(), "gpt-5");
    }
}
