//! Sandbox environment records

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::AgentId;

/// Pool-assigned environment identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvId(String);

impl EnvId {
    pub fn generate() -> Self {
        let hex: String = uuid::Uuid::new_v4().simple().to_string().chars().take(8).collect();
        Self(format!("env_{hex}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EnvId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Environment lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvState {
    Provisioning,
    Ready,
    InUse,
    TearingDown,
    Released,
}

/// Who an environment belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvBinding {
    Agent(AgentId),
    /// Pooled by policy, used by every agent of the run
    Shared,
}

impl fmt::Display for EnvBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvBinding::Agent(id) => write!(f, "{id}"),
            EnvBinding::Shared => f.write_str("shared"),
        }
    }
}

/// Runtime-side reference to a provisioned environment (a container id for Docker)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxHandle {
    pub id: String,
    pub name: String,
}

/// Snapshot of an environment as tracked by the pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxEnvironment {
    pub id: EnvId,
    pub binding: EnvBinding,
    pub state: EnvState,
    pub handle: Option<SandboxHandle>,
    pub created_at: DateTime<Utc>,
}

impl SandboxEnvironment {
    pub fn provisioning(id: EnvId, binding: EnvBinding) -> Self {
        Self {
            id,
            binding,
            state: EnvState::Provisioning,
            handle: None,
            created_at: Utc::now(),
        }
    }
}
