//! Docker-backed sandbox runtime

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::environment::SandboxHandle;
use super::runtime::{
    CapabilityOutput, CapabilityRequest, ManagedSandbox, ProvisionSpec, SandboxRuntime,
};
use crate::config::SandboxConfig;
use crate::{Error, Result};

/// Maximum output size in bytes (10MB)
const MAX_OUTPUT_SIZE: usize = 10_485_760;

/// Label marking containers this runtime created
pub const MANAGED_LABEL: &str = "strix.managed";
/// Label carrying the owning run id
pub const RUN_LABEL: &str = "strix.run";
/// Label carrying the pool environment id
pub const ENV_LABEL: &str = "strix.env";

const WORKDIR: &str = "/workspace";

/// Sandbox runtime that gives every environment its own container
pub struct DockerRuntime {
    docker: Docker,
    config: SandboxConfig,
    /// Host directories bound read-only under the workspace
    mounts: Vec<(PathBuf, String)>,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon and verify it responds
    pub async fn connect(config: SandboxConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;

        docker.ping().await.map_err(|e| {
            Error::Docker(bollard::errors::Error::DockerResponseServerError {
                status_code: 500,
                message: format!("Cannot connect to Docker: {}", e),
            })
        })?;

        Ok(Self {
            docker,
            config,
            mounts: Vec::new(),
        })
    }

    /// Bind each `(host dir, subdir)` read-only at `/workspace/<subdir>` in new containers
    pub fn with_source_mounts(mut self, mounts: Vec<(PathBuf, String)>) -> Self {
        self.mounts = mounts;
        self
    }

    fn binds(&self) -> Option<Vec<String>> {
        if self.mounts.is_empty() {
            return None;
        }
        Some(
            self.mounts
                .iter()
                .map(|(host, sub)| format!("{}:{WORKDIR}/{sub}:ro", host.display()))
                .collect(),
        )
    }

    /// Check if the sandbox image exists locally
    pub async fn image_exists(&self) -> Result<bool> {
        match self.docker.inspect_image(&self.config.image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Pull the sandbox image if it is not present.
    ///
    /// The `on_progress` callback is called with each status line of the pull.
    pub async fn ensure_image<F>(&self, on_progress: F) -> Result<()>
    where
        F: Fn(&str),
    {
        if self.image_exists().await? {
            return Ok(());
        }

        info!(image = %self.config.image, "Pulling sandbox image");
        let options = CreateImageOptions {
            from_image: Some(self.config.image.clone()),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            let info = result?;
            if let Some(status) = info.status {
                on_progress(&status);
            }
            if let Some(error_detail) = info.error_detail {
                let message = error_detail
                    .message
                    .unwrap_or_else(|| "Unknown pull error".to_string());
                return Err(Error::Provision(message));
            }
        }

        info!(image = %self.config.image, "Sandbox image ready");
        Ok(())
    }

    fn container_name(spec: &ProvisionSpec) -> String {
        format!("strix-{}-{}", spec.run_id, spec.env_id)
    }

    fn command_for(&self, request: &CapabilityRequest) -> Result<Vec<String>> {
        Ok(match request {
            CapabilityRequest::Terminal { command, .. } => {
                vec!["sh".to_string(), "-c".to_string(), command.clone()]
            }
            CapabilityRequest::Python { code } => {
                vec!["python3".to_string(), "-c".to_string(), code.clone()]
            }
            CapabilityRequest::Proxy { action, args }
            | CapabilityRequest::Browser { action, args }
            | CapabilityRequest::Files { action, args } => {
                let body = serde_json::json!({ "action": action, "args": args });
                vec![
                    self.config.capability_command.clone(),
                    request.capability().to_string(),
                    serde_json::to_string(&body)?,
                ]
            }
        })
    }

    async fn exec(
        &self,
        container_id: &str,
        cmd: Vec<String>,
        workdir: Option<&str>,
    ) -> Result<CapabilityOutput> {
        debug!(container = %container_id, "Executing: {:?}", cmd);

        let exec_config = CreateExecOptions {
            cmd: Some(cmd),
            working_dir: Some(workdir.unwrap_or(WORKDIR).to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self.docker.create_exec(container_id, exec_config).await?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut total_size: usize = 0;
        let mut truncated = false;

        if let StartExecResults::Attached {
            output: mut stream, ..
        } = self.docker.start_exec(&exec.id, None).await?
        {
            while let Some(msg) = stream.next().await {
                let (target, message) = match msg {
                    Ok(LogOutput::StdOut { message }) => (&mut stdout, message),
                    Ok(LogOutput::StdErr { message }) => (&mut stderr, message),
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("Error reading exec output: {}", e);
                        continue;
                    }
                };
                if truncated {
                    continue;
                }
                let chunk = String::from_utf8_lossy(&message);
                total_size += chunk.len();
                if total_size > MAX_OUTPUT_SIZE {
                    truncated = true;
                    target.push_str("\n[OUTPUT TRUNCATED - exceeded 10MB limit]");
                } else {
                    target.push_str(&chunk);
                }
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        let exit_code = inspect.exit_code.unwrap_or(-1);

        Ok(CapabilityOutput {
            stdout,
            stderr,
            exit_code,
            payload: None,
            artifacts: vec![],
        })
    }
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    fn name(&self) -> &str {
        "docker"
    }

    async fn provision(&self, spec: &ProvisionSpec) -> Result<SandboxHandle> {
        let name = Self::container_name(spec);
        let memory = self.config.memory_limit_mb * 1024 * 1024;

        let host_config = HostConfig {
            cap_add: Some(vec!["NET_ADMIN".to_string(), "NET_RAW".to_string()]),
            memory: Some(memory),
            memory_swap: Some(memory), // No swap
            pids_limit: Some(self.config.pids_limit),
            binds: self.binds(),
            ..Default::default()
        };

        let labels = HashMap::from([
            (MANAGED_LABEL.to_string(), "true".to_string()),
            (RUN_LABEL.to_string(), spec.run_id.clone()),
            (ENV_LABEL.to_string(), spec.env_id.to_string()),
        ]);

        let body = ContainerCreateBody {
            image: Some(self.config.image.clone()),
            hostname: Some("strix-sandbox".to_string()),
            working_dir: Some(WORKDIR.to_string()),
            host_config: Some(host_config),
            labels: Some(labels),
            tty: Some(true),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: Some(name.clone()),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), body)
            .await
            .map_err(|e| Error::Provision(format!("create {name}: {e}")))?;

        if let Err(e) = self
            .docker
            .start_container(&response.id, None::<StartContainerOptions>)
            .await
        {
            // do not leave a created-but-stopped container behind
            let _ = self
                .docker
                .remove_container(
                    &response.id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
            return Err(Error::Provision(format!("start {name}: {e}")));
        }

        info!(container = %response.id, env = %spec.env_id, binding = %spec.binding, "Sandbox container started");
        Ok(SandboxHandle {
            id: response.id,
            name,
        })
    }

    async fn execute(
        &self,
        handle: &SandboxHandle,
        request: &CapabilityRequest,
    ) -> Result<CapabilityOutput> {
        let cmd = self.command_for(request)?;
        let workdir = match request {
            CapabilityRequest::Terminal { workdir, .. } => workdir.as_deref(),
            _ => None,
        };

        let mut output = self.exec(&handle.id, cmd, workdir).await?;

        if matches!(
            request,
            CapabilityRequest::Proxy { .. }
                | CapabilityRequest::Browser { .. }
                | CapabilityRequest::Files { .. }
        ) {
            if let Ok(payload) = serde_json::from_str::<serde_json::Value>(output.stdout.trim()) {
                if let Some(files) = payload.get("artifacts").and_then(|a| a.as_array()) {
                    output.artifacts = files
                        .iter()
                        .filter_map(|f| f.as_str().map(str::to_string))
                        .collect();
                }
                output.payload = Some(payload);
            }
        }

        Ok(output)
    }

    async fn interrupt(&self, handle: &SandboxHandle) -> Result<()> {
        // SIGINT to every process except PID 1 keeps the container alive
        let cmd = vec!["kill".to_string(), "-INT".to_string(), "-1".to_string()];
        self.exec(&handle.id, cmd, None).await.map(|_| ())
    }

    async fn destroy(&self, handle: &SandboxHandle) -> Result<()> {
        info!(container = %handle.name, "Removing sandbox container");
        match self
            .docker
            .remove_container(
                &handle.id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(Error::Teardown(format!("remove {}: {}", handle.name, e))),
        }
    }

    async fn list_managed(&self) -> Result<Vec<ManagedSandbox>> {
        let filters = HashMap::from([(
            "label".to_string(),
            vec![format!("{MANAGED_LABEL}=true")],
        )]);
        let options = ListContainersOptions {
            all: true,
            filters: Some(filters),
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| id.clone());
                let run_id = c
                    .labels
                    .and_then(|labels| labels.get(RUN_LABEL).cloned())
                    .unwrap_or_default();
                Some(ManagedSandbox {
                    handle: SandboxHandle { id, name },
                    run_id,
                })
            })
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::agents::AgentId;
    use crate::sandbox::{EnvBinding, EnvId};

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_docker_runtime_lifecycle() {
        let runtime = DockerRuntime::connect(SandboxConfig {
            image: "alpine:3".to_string(),
            ..SandboxConfig::default()
        })
        .await
        .expect("docker should be reachable");
        runtime.ensure_image(|_| {}).await.expect("image should pull");

        let spec = ProvisionSpec {
            env_id: EnvId::generate(),
            run_id: "test-run".to_string(),
            binding: EnvBinding::Agent(AgentId::generate()),
        };
        let handle = runtime.provision(&spec).await.expect("should provision");

        let out = runtime
            .execute(
                &handle,
                &CapabilityRequest::Terminal {
                    command: "echo hello".to_string(),
                    workdir: Some("/".to_string()),
                },
            )
            .await
            .expect("should exec");
        assert!(out.success());
        assert!(out.stdout.contains("hello"));

        let managed = runtime.list_managed().await.expect("should list");
        assert!(managed.iter().any(|m| m.handle.id == handle.id && m.run_id == "test-run"));

        runtime.destroy(&handle).await.expect("should destroy");
        runtime.destroy(&handle).await.expect("second destroy is a no-op");
    }
}
