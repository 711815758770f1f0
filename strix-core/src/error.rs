//! Error types for strix-core

use miette::Diagnostic;
use thiserror::Error;

/// Main error type for strix-core
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("Configuration error: {0}")]
    #[diagnostic(code(strix::config))]
    Config(String),

    #[error("Database error: {0}")]
    #[diagnostic(code(strix::database))]
    Database(#[from] rusqlite::Error),

    #[error("Docker error: {0}")]
    #[diagnostic(code(strix::docker))]
    Docker(#[from] bollard::errors::Error),

    #[error("IO error: {0}")]
    #[diagnostic(code(strix::io))]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(strix::serde))]
    Serde(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    #[diagnostic(code(strix::toml))]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    #[diagnostic(code(strix::toml))]
    TomlSerialize(#[from] toml::ser::Error),

    /// Reasoning call failed (transport, auth, provider-side)
    #[error("Provider error: {0}")]
    #[diagnostic(code(strix::provider))]
    Provider(String),

    /// Reasoning call returned something that does not decode into an action
    #[error("Malformed action: {0}")]
    #[diagnostic(code(strix::action))]
    MalformedAction(String),

    #[error("Tool error: {0}")]
    #[diagnostic(code(strix::tool))]
    Tool(String),

    /// Admission or provisioning capacity reached
    #[error("Resource exhausted: {0}")]
    #[diagnostic(code(strix::resource_exhausted))]
    ResourceExhausted(String),

    #[error("Capacity exceeded: {0}")]
    #[diagnostic(
        code(strix::capacity),
        help("Raise limits.max_agents or limits.max_queued in the run configuration")
    )]
    CapacityExceeded(String),

    #[error("Timed out: {0}")]
    #[diagnostic(code(strix::timeout))]
    Timeout(String),

    #[error("Sandbox provisioning failed: {0}")]
    #[diagnostic(code(strix::provision), help("Check that Docker is running and the sandbox image is available"))]
    Provision(String),

    #[error("Sandbox teardown failed: {0}")]
    #[diagnostic(code(strix::teardown))]
    Teardown(String),

    #[error("Cancelled: {0}")]
    #[diagnostic(code(strix::cancelled))]
    Cancelled(String),

    #[error("Agent not found: {0}")]
    #[diagnostic(code(strix::agent_not_found))]
    AgentNotFound(String),

    #[error("Sandbox environment not found: {0}")]
    #[diagnostic(code(strix::env_not_found))]
    EnvironmentNotFound(String),

    /// Shared store failure; aborts the whole run
    #[error("Knowledge store unavailable: {0}")]
    #[diagnostic(code(strix::knowledge))]
    KnowledgeStore(String),

    #[error("Invalid target: {0}")]
    #[diagnostic(code(strix::target))]
    InvalidTarget(String),

    #[error("Report error: {0}")]
    #[diagnostic(code(strix::report))]
    Report(String),
}

impl Error {
    /// Whether this error means the run itself can no longer continue
    pub fn is_infrastructure_failure(&self) -> bool {
        matches!(self, Error::KnowledgeStore(_))
    }
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;
