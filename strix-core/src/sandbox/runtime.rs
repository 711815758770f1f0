//! Isolated execution environment provider interface

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::environment::{EnvBinding, EnvId, SandboxHandle};
use crate::Result;

/// Everything a runtime needs to create one environment
#[derive(Debug, Clone)]
pub struct ProvisionSpec {
    pub env_id: EnvId,
    pub run_id: String,
    pub binding: EnvBinding,
}

/// One call into an environment's capability endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "capability", rename_all = "snake_case")]
pub enum CapabilityRequest {
    Terminal {
        command: String,
        workdir: Option<String>,
    },
    Proxy {
        action: String,
        args: Value,
    },
    Browser {
        action: String,
        args: Value,
    },
    Python {
        code: String,
    },
    /// File viewing, editing and search under the environment's workspace
    Files {
        action: String,
        args: Value,
    },
}

impl CapabilityRequest {
    pub fn capability(&self) -> &'static str {
        match self {
            CapabilityRequest::Terminal { .. } => "terminal",
            CapabilityRequest::Proxy { .. } => "proxy",
            CapabilityRequest::Browser { .. } => "browser",
            CapabilityRequest::Python { .. } => "python",
            CapabilityRequest::Files { .. } => "files",
        }
    }
}

/// Raw result of a capability call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    /// Structured result for capabilities that return JSON
    pub payload: Option<Value>,
    /// Files the call produced inside the environment (screenshots, dumps)
    pub artifacts: Vec<String>,
}

impl CapabilityOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Combined output (stdout + stderr)
    pub fn output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// An environment the runtime knows about, whoever created it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedSandbox {
    pub handle: SandboxHandle,
    pub run_id: String,
}

/// Provider of isolated execution environments
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    fn name(&self) -> &str;

    /// Create and start an environment
    async fn provision(&self, spec: &ProvisionSpec) -> Result<SandboxHandle>;

    /// Run one capability call to completion
    async fn execute(
        &self,
        handle: &SandboxHandle,
        request: &CapabilityRequest,
    ) -> Result<CapabilityOutput>;

    /// Ask whatever is running inside the environment to stop
    async fn interrupt(&self, handle: &SandboxHandle) -> Result<()>;

    /// Destroy the environment; destroying one that is already gone succeeds
    async fn destroy(&self, handle: &SandboxHandle) -> Result<()>;

    /// Every environment this runtime manages, across runs
    async fn list_managed(&self) -> Result<Vec<ManagedSandbox>>;
}
