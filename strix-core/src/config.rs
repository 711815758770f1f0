//! Configuration types for strix runs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::providers::RetryConfig;

/// LLM provider selection, parsed from the `provider/` prefix of a model string
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName {
    #[default]
    OpenAi,
    Anthropic,
}

impl ProviderName {
    /// Split `provider/model` into provider and bare model name.
    /// A model without a known prefix is routed through the OpenAI-compatible client.
    pub fn split_model(model: &str) -> (Self, &str) {
        match model.split_once('/') {
            Some(("anthropic", rest)) => (Self::Anthropic, rest),
            Some(("openai", rest)) => (Self::OpenAi, rest),
            _ if model.starts_with("claude-") => (Self::Anthropic, model),
            _ => (Self::OpenAi, model),
        }
    }
}

/// Reasoning provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
}

fn default_model() -> String {
    "openai/gpt-5".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

fn default_max_tokens() -> u64 {
    8192
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key: None,
            base_url: None,
            request_timeout_secs: default_request_timeout(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Spacing and concurrency of outgoing reasoning requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_rate_delay_ms")]
    pub delay_ms: u64,
}

fn default_rate_concurrent() -> usize {
    1
}

fn default_rate_delay_ms() -> u64 {
    4000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_rate_concurrent(),
            delay_ms: default_rate_delay_ms(),
        }
    }
}

/// Concurrency ceilings and per-agent budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,
    #[serde(default = "default_max_sandboxes")]
    pub max_sandboxes: usize,
    /// Admission requests allowed to wait for capacity before spawns are refused
    #[serde(default = "default_max_queued")]
    pub max_queued: usize,
    #[serde(default = "default_root_max_steps")]
    pub root_max_steps: u32,
    #[serde(default = "default_child_max_steps")]
    pub child_max_steps: u32,
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
    #[serde(default = "default_max_reasoning_failures")]
    pub max_reasoning_failures: u32,
}

fn default_max_agents() -> usize {
    8
}

fn default_max_sandboxes() -> usize {
    8
}

fn default_max_queued() -> usize {
    64
}

fn default_root_max_steps() -> u32 {
    300
}

fn default_child_max_steps() -> u32 {
    100
}

fn default_run_timeout() -> u64 {
    7200
}

fn default_max_reasoning_failures() -> u32 {
    3
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_agents: default_max_agents(),
            max_sandboxes: default_max_sandboxes(),
            max_queued: default_max_queued(),
            root_max_steps: default_root_max_steps(),
            child_max_steps: default_child_max_steps(),
            run_timeout_secs: default_run_timeout(),
            max_reasoning_failures: default_max_reasoning_failures(),
        }
    }
}

/// How sandbox environments map onto agents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxPolicy {
    /// Every agent gets its own environment, torn down when the agent ends
    #[default]
    PerAgent,
    /// All agents share one pooled environment; calls are serialized
    Shared,
}

/// Sandbox runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default)]
    pub policy: SandboxPolicy,
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_grace_timeout")]
    pub grace_timeout_secs: u64,
    #[serde(default = "default_memory_limit")]
    pub memory_limit_mb: i64,
    #[serde(default = "default_pids_limit")]
    pub pids_limit: i64,
    /// In-image dispatcher for proxy, browser and file capabilities
    #[serde(default = "default_capability_command")]
    pub capability_command: String,
}

fn default_image() -> String {
    "ghcr.io/usestrix/strix-sandbox:0.1.10".to_string()
}

fn default_tool_timeout() -> u64 {
    500
}

fn default_grace_timeout() -> u64 {
    10
}

fn default_memory_limit() -> i64 {
    4096
}

fn default_pids_limit() -> i64 {
    1024
}

fn default_capability_command() -> String {
    "/usr/local/bin/strix-tool".to_string()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            policy: SandboxPolicy::default(),
            tool_timeout_secs: default_tool_timeout(),
            grace_timeout_secs: default_grace_timeout(),
            memory_limit_mb: default_memory_limit(),
            pids_limit: default_pids_limit(),
            capability_command: default_capability_command(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_runs_dir")]
    pub runs_dir: PathBuf,
    #[serde(default = "default_true")]
    pub export_json: bool,
    #[serde(default = "default_true")]
    pub export_markdown: bool,
}

fn default_runs_dir() -> PathBuf {
    PathBuf::from("agent_runs")
}

fn default_true() -> bool {
    true
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            runs_dir: default_runs_dir(),
            export_json: true,
            export_markdown: true,
        }
    }
}

/// Complete run configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl RunConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string, expanding `${VAR}` references first
    pub fn parse(content: &str) -> crate::Result<Self> {
        let expanded = expand_env_vars(content);
        let config: RunConfig = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config with fallback chain: explicit path -> ./strix.toml -> ~/.strix/config.toml -> defaults
    pub fn load(explicit: Option<&std::path::Path>) -> crate::Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        if let Ok(config) = Self::from_file("strix.toml") {
            return Ok(config);
        }

        if let Some(global_path) = Self::global_config_path() {
            if let Ok(config) = Self::from_file(&global_path) {
                return Ok(config);
            }
        }

        Ok(Self::default())
    }

    /// Get the global config file path
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".strix").join("config.toml"))
    }

    /// Apply the process environment on top of the file configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(model) = lookup("STRIX_LLM").filter(|v| !v.is_empty()) {
            self.provider.model = model;
        }
        if let Some(key) = lookup("LLM_API_KEY").filter(|v| !v.is_empty()) {
            self.provider.api_key = Some(key);
        }
        if let Some(base) = lookup("LLM_API_BASE").filter(|v| !v.is_empty()) {
            self.provider.base_url = Some(base);
        }
        if let Some(delay) = lookup("LLM_RATE_LIMIT_DELAY").and_then(|v| v.parse::<f64>().ok()) {
            if delay >= 0.0 {
                self.rate_limit.delay_ms = (delay * 1000.0) as u64;
            }
        }
        if let Some(concurrent) =
            lookup("LLM_RATE_LIMIT_CONCURRENT").and_then(|v| v.parse::<usize>().ok())
        {
            self.rate_limit.max_concurrent = concurrent.max(1);
        }
        if let Some(image) = lookup("STRIX_IMAGE").filter(|v| !v.is_empty()) {
            self.sandbox.image = image;
        }
        if let Some(timeout) =
            lookup("STRIX_SANDBOX_EXECUTION_TIMEOUT").and_then(|v| v.parse::<u64>().ok())
        {
            self.sandbox.tool_timeout_secs = timeout;
        }
    }

    /// Reject configurations that could never admit an agent
    pub fn validate(&self) -> crate::Result<()> {
        if self.limits.max_agents == 0 {
            return Err(crate::Error::Config(
                "limits.max_agents must be at least 1".to_string(),
            ));
        }
        if self.limits.max_sandboxes == 0 {
            return Err(crate::Error::Config(
                "limits.max_sandboxes must be at least 1".to_string(),
            ));
        }
        if self.rate_limit.max_concurrent == 0 {
            return Err(crate::Error::Config(
                "rate_limit.max_concurrent must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.sandbox.tool_timeout_secs)
    }

    pub fn grace_timeout(&self) -> Duration {
        Duration::from_secs(self.sandbox.grace_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.limits.run_timeout_secs)
    }

    /// Concurrently running agents allowed by the tighter of the two ceilings
    pub fn effective_agent_ceiling(&self) -> usize {
        match self.sandbox.policy {
            SandboxPolicy::PerAgent => self.limits.max_agents.min(self.limits.max_sandboxes),
            SandboxPolicy::Shared => self.limits.max_agents,
        }
    }

    /// Serialize to TOML, with the API key blanked out
    pub fn to_redacted_toml(&self) -> crate::Result<String> {
        let mut copy = self.clone();
        if copy.provider.api_key.is_some() {
            copy.provider.api_key = Some("<redacted>".to_string());
        }
        Ok(toml::to_string_pretty(&copy)?)
    }
}

/// Replace `${VAR}` with the value of `VAR`; unknown variables are left as-is
pub fn expand_env_vars(content: &str) -> String {
    expand_with(content, |name| std::env::var(name).ok())
}

fn expand_with(content: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_config_uses_defaults() {
        let config = RunConfig::parse("").unwrap();
        assert_eq!(config.provider.model, "openai/gpt-5");
        assert_eq!(config.limits.max_reasoning_failures, 3);
        assert_eq!(config.limits.root_max_steps, 300);
        assert_eq!(config.sandbox.tool_timeout_secs, 500);
        assert_eq!(config.rate_limit.max_concurrent, 1);
        assert_eq!(config.retry.max_retries, 5);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[provider]
model = "anthropic/claude-sonnet-4-5"
api_key = "sk-test"

[retry]
max_retries = 2
initial_delay_ms = 100
max_delay_ms = 400

[limits]
max_agents = 4
max_sandboxes = 2
root_max_steps = 50

[sandbox]
policy = "shared"
grace_timeout_secs = 3

[output]
runs_dir = "/tmp/runs"
export_markdown = false
"#;
        let config = RunConfig::parse(toml).unwrap();
        assert_eq!(config.provider.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.limits.max_agents, 4);
        assert_eq!(config.sandbox.policy, SandboxPolicy::Shared);
        assert_eq!(config.grace_timeout(), Duration::from_secs(3));
        assert!(!config.output.export_markdown);
        assert!(config.output.export_json);
        // shared policy is bounded by agents only
        assert_eq!(config.effective_agent_ceiling(), 4);
    }

    #[test]
    fn test_effective_ceiling_takes_tighter_limit() {
        let config = RunConfig::parse("[limits]\nmax_agents = 10\nmax_sandboxes = 3\n").unwrap();
        assert_eq!(config.effective_agent_ceiling(), 3);
    }

    #[test]
    fn test_zero_ceiling_rejected() {
        let result = RunConfig::parse("[limits]\nmax_agents = 0\n");
        assert!(matches!(result, Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_env_var_expansion() {
        let expanded = expand_with("api_key = \"${STRIX_TEST_KEY}\"\nother = \"${MISSING}\"", |name| {
            (name == "STRIX_TEST_KEY").then(|| "secret".to_string())
        });
        assert_eq!(expanded, "api_key = \"secret\"\nother = \"${MISSING}\"");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = RunConfig::default();
        config.apply_overrides_from(|name| match name {
            "STRIX_LLM" => Some("anthropic/claude-opus-4".to_string()),
            "LLM_RATE_LIMIT_DELAY" => Some("0.5".to_string()),
            "LLM_RATE_LIMIT_CONCURRENT" => Some("3".to_string()),
            "STRIX_SANDBOX_EXECUTION_TIMEOUT" => Some("60".to_string()),
            _ => None,
        });
        assert_eq!(config.provider.model, "anthropic/claude-opus-4");
        assert_eq!(config.rate_limit.delay_ms, 500);
        assert_eq!(config.rate_limit.max_concurrent, 3);
        assert_eq!(config.sandbox.tool_timeout_secs, 60);
    }

    #[test]
    fn test_split_model() {
        assert_eq!(
            ProviderName::split_model("anthropic/claude-sonnet-4-5"),
            (ProviderName::Anthropic, "claude-sonnet-4-5")
        );
        assert_eq!(ProviderName::split_model("openai/gpt-5"), (ProviderName::OpenAi, "gpt-5"));
        assert_eq!(ProviderName::split_model("gpt-4o"), (ProviderName::OpenAi, "gpt-4o"));
    }

    #[test]
    fn test_redacted_toml_hides_key() {
        let mut config = RunConfig::default();
        config.provider.api_key = Some("sk-live".to_string());
        let rendered = config.to_redacted_toml().unwrap();
        assert!(!rendered.contains("sk-live"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_global_config_path() {
        if let Some(path) = RunConfig::global_config_path() {
            assert!(path.ends_with(".strix/config.toml"));
        }
    }
}
