//! Sandbox environment lifecycle
//!
//! The pool is the only owner of environments. Agents borrow them through
//! `acquire`/`release`; tool calls check them out one at a time through the
//! per-environment execution lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use super::environment::{EnvBinding, EnvId, EnvState, SandboxEnvironment, SandboxHandle};
use super::runtime::{ProvisionSpec, SandboxRuntime};
use crate::agents::AgentId;
use crate::config::SandboxPolicy;
use crate::{Error, Result};

/// Pool construction parameters
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub run_id: String,
    pub policy: SandboxPolicy,
    pub max_environments: usize,
    /// How long an interrupted environment gets to settle before it is destroyed
    pub grace_timeout: Duration,
}

/// What a tool call needs to run against an environment
#[derive(Clone)]
pub struct EnvCheckout {
    pub env_id: EnvId,
    pub handle: SandboxHandle,
    /// Held for the whole call so calls against one environment never overlap
    pub exec_lock: Arc<Mutex<()>>,
}

/// Outcome of the end-of-run sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub released: usize,
    pub forced: usize,
    pub failed: usize,
}

struct PoolEntry {
    env: SandboxEnvironment,
    exec_lock: Arc<Mutex<()>>,
    permit: Option<OwnedSemaphorePermit>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<EnvId, PoolEntry>,
    /// Agent to environment, for both policies
    bound: HashMap<AgentId, EnvId>,
    shared: Option<EnvId>,
    /// Environments whose teardown failed twice
    forced_cleanup: Vec<(EnvId, SandboxHandle)>,
    closed: bool,
}

/// Owner of every sandbox environment of a run
pub struct SandboxPool {
    runtime: Arc<dyn SandboxRuntime>,
    config: PoolConfig,
    capacity: Arc<Semaphore>,
    inner: Mutex<Inner>,
    /// Serializes creation of the shared environment
    shared_init: Mutex<()>,
}

impl SandboxPool {
    pub fn new(runtime: Arc<dyn SandboxRuntime>, config: PoolConfig) -> Self {
        let max = config.max_environments.max(1);
        Self {
            runtime,
            capacity: Arc::new(Semaphore::new(max)),
            config,
            inner: Mutex::new(Inner::default()),
            shared_init: Mutex::new(()),
        }
    }

    pub fn runtime(&self) -> Arc<dyn SandboxRuntime> {
        Arc::clone(&self.runtime)
    }

    pub fn policy(&self) -> SandboxPolicy {
        self.config.policy
    }

    pub fn run_id(&self) -> &str {
        &self.config.run_id
    }

    /// Environment bound to `agent_id`, waiting for capacity if the pool is full
    pub async fn acquire(&self, agent_id: &AgentId) -> Result<EnvId> {
        if let Some(existing) = self.bound_env(agent_id).await? {
            return Ok(existing);
        }

        match self.config.policy {
            SandboxPolicy::Shared => self.acquire_shared(agent_id).await,
            SandboxPolicy::PerAgent => {
                let permit = Arc::clone(&self.capacity)
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::ResourceExhausted("sandbox pool closed".to_string()))?;
                self.provision_for(EnvBinding::Agent(agent_id.clone()), permit)
                    .await
            }
        }
    }

    /// Like `acquire`, but fails with ResourceExhausted instead of waiting
    pub async fn try_acquire(&self, agent_id: &AgentId) -> Result<EnvId> {
        if let Some(existing) = self.bound_env(agent_id).await? {
            return Ok(existing);
        }

        match self.config.policy {
            SandboxPolicy::Shared => self.acquire_shared(agent_id).await,
            SandboxPolicy::PerAgent => {
                let permit = Arc::clone(&self.capacity).try_acquire_owned().map_err(|_| {
                    Error::ResourceExhausted(format!(
                        "all {} sandbox environments are in use",
                        self.config.max_environments
                    ))
                })?;
                self.provision_for(EnvBinding::Agent(agent_id.clone()), permit)
                    .await
            }
        }
    }

    async fn bound_env(&self, agent_id: &AgentId) -> Result<Option<EnvId>> {
        let inner = self.inner.lock().await;
        if inner.closed {
            return Err(Error::ResourceExhausted(
                "sandbox pool is shutting down".to_string(),
            ));
        }
        Ok(inner.bound.get(agent_id).cloned())
    }

    async fn acquire_shared(&self, agent_id: &AgentId) -> Result<EnvId> {
        let _init = self.shared_init.lock().await;

        let existing = {
            let inner = self.inner.lock().await;
            inner.shared.clone()
        };

        let env_id = match existing {
            Some(env_id) => env_id,
            None => {
                let permit = Arc::clone(&self.capacity)
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::ResourceExhausted("sandbox pool closed".to_string()))?;
                let env_id = self.provision_for(EnvBinding::Shared, permit).await?;
                self.inner.lock().await.shared = Some(env_id.clone());
                env_id
            }
        };

        self.inner
            .lock()
            .await
            .bound
            .insert(agent_id.clone(), env_id.clone());
        Ok(env_id)
    }

    /// Provision with one retry; the permit is returned to the pool on failure
    async fn provision_for(
        &self,
        binding: EnvBinding,
        permit: OwnedSemaphorePermit,
    ) -> Result<EnvId> {
        let env_id = EnvId::generate();
        {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            if inner.closed {
                return Err(Error::ResourceExhausted(
                    "sandbox pool is shutting down".to_string(),
                ));
            }
            inner.entries.insert(
                env_id.clone(),
                PoolEntry {
                    env: SandboxEnvironment::provisioning(env_id.clone(), binding.clone()),
                    exec_lock: Arc::new(Mutex::new(())),
                    permit: Some(permit),
                },
            );
            if let EnvBinding::Agent(agent_id) = &binding {
                inner.bound.insert(agent_id.clone(), env_id.clone());
            }
        }

        let spec = ProvisionSpec {
            env_id: env_id.clone(),
            run_id: self.config.run_id.clone(),
            binding: binding.clone(),
        };

        let handle = match self.runtime.provision(&spec).await {
            Ok(handle) => Ok(handle),
            Err(first) => {
                warn!(env = %env_id, error = %first, "Provisioning failed, retrying once");
                self.runtime.provision(&spec).await
            }
        };

        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        match handle {
            Ok(handle) => match inner.entries.get_mut(&env_id) {
                Some(entry) if entry.env.state == EnvState::Provisioning => {
                    entry.env.handle = Some(handle);
                    entry.env.state = EnvState::Ready;
                    debug!(env = %env_id, binding = %binding, "Sandbox environment ready");
                    Ok(env_id)
                }
                // released while provisioning; the sweep at run end destroys the container
                _ => {
                    inner.forced_cleanup.push((env_id.clone(), handle));
                    Err(Error::Cancelled(format!(
                        "environment {env_id} released during provisioning"
                    )))
                }
            },
            Err(e) => {
                error!(env = %env_id, error = %e, "Provisioning failed twice");
                inner.entries.remove(&env_id);
                if let EnvBinding::Agent(agent_id) = &binding {
                    inner.bound.remove(agent_id);
                }
                Err(Error::ResourceExhausted(format!(
                    "could not provision sandbox: {e}"
                )))
            }
        }
    }

    /// Handle and execution lock for a tool call
    pub async fn checkout(&self, env_id: &EnvId) -> Result<EnvCheckout> {
        let inner = self.inner.lock().await;
        let entry = inner
            .entries
            .get(env_id)
            .ok_or_else(|| Error::EnvironmentNotFound(env_id.to_string()))?;

        match (entry.env.state, &entry.env.handle) {
            (EnvState::Ready | EnvState::InUse, Some(handle)) => Ok(EnvCheckout {
                env_id: env_id.clone(),
                handle: handle.clone(),
                exec_lock: Arc::clone(&entry.exec_lock),
            }),
            (state, _) => Err(Error::EnvironmentNotFound(format!(
                "{env_id} is not usable ({state:?})"
            ))),
        }
    }

    /// Flip between Ready and InUse; ignored once teardown has begun
    pub async fn mark_in_use(&self, env_id: &EnvId, in_use: bool) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if let Some(entry) = inner.entries.get_mut(env_id) {
            entry.env.state = match (entry.env.state, in_use) {
                (EnvState::Ready, true) => EnvState::InUse,
                (EnvState::InUse, false) => EnvState::Ready,
                (state, _) => state,
            };
        }
    }

    /// Environment currently bound to an agent
    pub async fn env_for(&self, agent_id: &AgentId) -> Option<EnvId> {
        self.inner.lock().await.bound.get(agent_id).cloned()
    }

    /// Tear down an environment. Idempotent.
    ///
    /// The environment is interrupted first; an in-flight call gets the grace
    /// timeout to wind down before the environment is destroyed regardless.
    pub async fn release(&self, env_id: &EnvId) -> Result<()> {
        let (handle, exec_lock, permit) = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            let Some(entry) = inner.entries.get_mut(env_id) else {
                return Ok(());
            };
            match entry.env.state {
                EnvState::TearingDown | EnvState::Released => return Ok(()),
                _ => {}
            }
            entry.env.state = EnvState::TearingDown;
            let handle = entry.env.handle.clone();
            let exec_lock = Arc::clone(&entry.exec_lock);
            let permit = entry.permit.take();

            inner.bound.retain(|_, bound| *bound != *env_id);
            if inner.shared.as_ref() == Some(env_id) {
                inner.shared = None;
            }
            (handle, exec_lock, permit)
        };

        let result = match handle {
            Some(handle) => self.teardown(env_id, &handle, &exec_lock).await,
            None => Ok(()),
        };

        {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            match (&result, inner.entries.get_mut(env_id)) {
                (Ok(()), Some(entry)) => {
                    entry.env.state = EnvState::Released;
                    entry.env.handle = None;
                }
                (Err(_), Some(entry)) => {
                    if let Some(handle) = entry.env.handle.clone() {
                        inner.forced_cleanup.push((env_id.clone(), handle));
                    }
                }
                _ => {}
            }
        }

        drop(permit);
        result
    }

    async fn teardown(
        &self,
        env_id: &EnvId,
        handle: &SandboxHandle,
        exec_lock: &Mutex<()>,
    ) -> Result<()> {
        let grace = self.config.grace_timeout;

        match tokio::time::timeout(grace, self.runtime.interrupt(handle)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(env = %env_id, error = %e, "Interrupt failed"),
            Err(_) => debug!(env = %env_id, "Interrupt timed out"),
        }

        if tokio::time::timeout(grace, exec_lock.lock()).await.is_err() {
            warn!(env = %env_id, "In-flight call did not stop within grace timeout, forcing teardown");
        }

        let mut last_error = None;
        for attempt in 1..=2 {
            match tokio::time::timeout(grace, self.runtime.destroy(handle)).await {
                Ok(Ok(())) => {
                    info!(env = %env_id, container = %handle.name, "Sandbox environment released");
                    return Ok(());
                }
                Ok(Err(e)) => last_error = Some(e.to_string()),
                Err(_) => last_error = Some("destroy timed out".to_string()),
            }
            warn!(env = %env_id, attempt, "Sandbox teardown failed");
        }

        Err(Error::Teardown(format!(
            "{env_id}: {}",
            last_error.unwrap_or_default()
        )))
    }

    /// Release the environment bound to an agent. Shared environments only lose the binding.
    pub async fn release_agent(&self, agent_id: &AgentId) -> Result<()> {
        let env_id = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            let Some(env_id) = inner.bound.get(agent_id).cloned() else {
                return Ok(());
            };
            if inner.shared.as_ref() == Some(&env_id) {
                inner.bound.remove(agent_id);
                return Ok(());
            }
            env_id
        };
        self.release(&env_id).await
    }

    /// Environments not yet Released
    pub async fn outstanding(&self) -> usize {
        let inner = self.inner.lock().await;
        inner
            .entries
            .values()
            .filter(|e| e.env.state != EnvState::Released)
            .count()
    }

    /// Snapshot of every environment the pool has handed out
    pub async fn environments(&self) -> Vec<SandboxEnvironment> {
        let inner = self.inner.lock().await;
        let mut envs: Vec<_> = inner.entries.values().map(|e| e.env.clone()).collect();
        envs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        envs
    }

    /// End-of-run sweep: refuse new acquires, release everything still live,
    /// retry forced cleanups, and destroy any container of this run the pool lost track of
    pub async fn release_all(&self) -> SweepReport {
        let live: Vec<EnvId> = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            inner.closed = true;
            inner
                .entries
                .iter()
                .filter(|(_, e)| {
                    !matches!(e.env.state, EnvState::Released | EnvState::TearingDown)
                })
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut report = SweepReport::default();
        for env_id in live {
            match self.release(&env_id).await {
                Ok(()) => report.released += 1,
                Err(e) => warn!(env = %env_id, error = %e, "Release during sweep failed"),
            }
        }

        let forced: Vec<(EnvId, SandboxHandle)> = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            std::mem::take(&mut inner.forced_cleanup)
        };
        for (env_id, handle) in forced {
            match self.runtime.destroy(&handle).await {
                Ok(()) => {
                    report.forced += 1;
                    let mut guard = self.inner.lock().await;
                    let inner = &mut *guard;
                    if let Some(entry) = inner.entries.get_mut(&env_id) {
                        entry.env.state = EnvState::Released;
                        entry.env.handle = None;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    error!(env = %env_id, container = %handle.name, error = %e, "Forced cleanup failed");
                }
            }
        }

        match self.runtime.list_managed().await {
            Ok(managed) => {
                for sandbox in managed
                    .into_iter()
                    .filter(|m| m.run_id == self.config.run_id)
                {
                    if self.runtime.destroy(&sandbox.handle).await.is_ok() {
                        debug!(container = %sandbox.handle.name, "Destroyed untracked sandbox");
                    }
                }
            }
            Err(e) => warn!(error = %e, "Could not list sandboxes for final sweep"),
        }

        info!(
            released = report.released,
            forced = report.forced,
            failed = report.failed,
            "Sandbox sweep complete"
        );
        report
    }

    /// Crash recovery: destroy every managed environment left behind by other runs
    pub async fn recover_orphans(&self) -> Result<usize> {
        let managed = self.runtime.list_managed().await?;
        let mut destroyed = 0;
        for orphan in managed
            .into_iter()
            .filter(|m| m.run_id != self.config.run_id)
        {
            match self.runtime.destroy(&orphan.handle).await {
                Ok(()) => {
                    destroyed += 1;
                    info!(container = %orphan.handle.name, run = %orphan.run_id, "Destroyed orphaned sandbox");
                }
                Err(e) => warn!(container = %orphan.handle.name, error = %e, "Could not destroy orphaned sandbox"),
            }
        }
        Ok(destroyed)
    }
}
