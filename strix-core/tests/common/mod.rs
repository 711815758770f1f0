//! Fakes shared by the integration tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use strix_core::agents::{Action, ConversationContext, FindingReport, Prompts, SpawnRequest};
use strix_core::config::{RunConfig, SandboxPolicy};
use strix_core::events::NoopEvents;
use strix_core::graph::{Scheduler, SchedulerDeps};
use strix_core::knowledge::{KnowledgeStore, Severity};
use strix_core::providers::{Decision, ReasoningClient, TokenUsage};
use strix_core::sandbox::{
    CapabilityOutput, CapabilityRequest, ManagedSandbox, PoolConfig, ProvisionSpec, SandboxHandle,
    SandboxPool, SandboxRuntime,
};
use strix_core::state::{AuditSink, MetricsTracker, SqliteAuditLog};
use strix_core::{Error, Result};

/// Reasoner that plays a fixed script per agent name; the last action repeats
#[derive(Default)]
pub struct Scripted {
    scripts: Mutex<HashMap<String, Vec<Action>>>,
    pub contexts: Mutex<Vec<ConversationContext>>,
}

impl Scripted {
    pub fn script(self, name: &str, actions: Vec<Action>) -> Self {
        self.scripts.lock().unwrap().insert(name.to_string(), actions);
        self
    }

    /// Last message each time `name` was asked to decide
    pub fn last_messages(&self, name: &str) -> Vec<String> {
        self.contexts
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.agent_name == name)
            .filter_map(|c| c.messages.last().map(|m| m.content.clone()))
            .collect()
    }
}

#[async_trait]
impl ReasoningClient for Scripted {
    async fn decide(&self, context: &ConversationContext) -> Result<Decision> {
        self.contexts.lock().unwrap().push(context.clone());
        let action = {
            let mut scripts = self.scripts.lock().unwrap();
            let script = scripts
                .get_mut(&context.agent_name)
                .ok_or_else(|| Error::Provider(format!("no script for {}", context.agent_name)))?;
            if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            }
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(Decision {
            raw: format!("<function={}></function>", action.tool_name()),
            thought: String::new(),
            action,
            usage: TokenUsage::default(),
        })
    }
}

/// Runtime that keeps environments in a map and echoes commands back
#[derive(Default)]
pub struct MemoryRuntime {
    live: Mutex<HashMap<String, String>>,
    counter: AtomicUsize,
    pub provisioned: AtomicUsize,
}

impl MemoryRuntime {
    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap().len()
    }
}

#[async_trait]
impl SandboxRuntime for MemoryRuntime {
    fn name(&self) -> &str {
        "memory"
    }

    async fn provision(&self, spec: &ProvisionSpec) -> Result<SandboxHandle> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.provisioned.fetch_add(1, Ordering::SeqCst);
        let id = format!("mem-{n}");
        self.live
            .lock()
            .unwrap()
            .insert(id.clone(), spec.run_id.clone());
        Ok(SandboxHandle {
            name: id.clone(),
            id,
        })
    }

    async fn execute(
        &self,
        handle: &SandboxHandle,
        request: &CapabilityRequest,
    ) -> Result<CapabilityOutput> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if !self.live.lock().unwrap().contains_key(&handle.id) {
            return Err(Error::EnvironmentNotFound(handle.id.clone()));
        }
        let stdout = match request {
            CapabilityRequest::Terminal { command, .. } => command.clone(),
            other => other.capability().to_string(),
        };
        Ok(CapabilityOutput {
            stdout,
            ..Default::default()
        })
    }

    async fn interrupt(&self, _handle: &SandboxHandle) -> Result<()> {
        Ok(())
    }

    async fn destroy(&self, handle: &SandboxHandle) -> Result<()> {
        self.live.lock().unwrap().remove(&handle.id);
        Ok(())
    }

    async fn list_managed(&self) -> Result<Vec<ManagedSandbox>> {
        Ok(self
            .live
            .lock()
            .unwrap()
            .iter()
            .map(|(id, run_id)| ManagedSandbox {
                handle: SandboxHandle {
                    id: id.clone(),
                    name: id.clone(),
                },
                run_id: run_id.clone(),
            })
            .collect())
    }
}

pub struct Harness {
    pub scheduler: Scheduler,
    pub runtime: Arc<MemoryRuntime>,
    pub reasoner: Arc<Scripted>,
    pub audit: Arc<SqliteAuditLog>,
}

pub fn pool(runtime: Arc<MemoryRuntime>, max_environments: usize) -> Arc<SandboxPool> {
    Arc::new(SandboxPool::new(
        runtime,
        PoolConfig {
            run_id: "it-run".to_string(),
            policy: SandboxPolicy::PerAgent,
            max_environments,
            grace_timeout: Duration::from_millis(50),
        },
    ))
}

pub fn harness(reasoner: Scripted, config: RunConfig, audit: SqliteAuditLog) -> Harness {
    let runtime = Arc::new(MemoryRuntime::default());
    let audit = Arc::new(audit);
    let reasoner = Arc::new(reasoner);
    let scheduler = Scheduler::new(
        &config,
        SchedulerDeps {
            reasoner: reasoner.clone(),
            pool: pool(runtime.clone(), config.limits.max_sandboxes),
            knowledge: KnowledgeStore::with_mirror(audit.clone()),
            audit: audit.clone() as Arc<dyn AuditSink>,
            events: Arc::new(NoopEvents),
            metrics: MetricsTracker::new(),
            prompts: Arc::new(Prompts::default()),
        },
    );
    Harness {
        scheduler,
        runtime,
        reasoner,
        audit,
    }
}

pub fn config(max_agents: usize) -> RunConfig {
    let mut config = RunConfig::default();
    config.limits.max_agents = max_agents;
    config.limits.max_sandboxes = max_agents;
    config
}

pub fn spawn(name: &str) -> Action {
    Action::SpawnAgent(SpawnRequest::new(name, format!("work as {name}")))
}

pub fn finish(summary: &str) -> Action {
    Action::Finish {
        success: true,
        summary: summary.to_string(),
    }
}

pub fn terminal(command: &str) -> Action {
    let mut args = Map::new();
    args.insert("command".to_string(), Value::String(command.to_string()));
    Action::ToolCall {
        name: "terminal_execute".to_string(),
        args,
    }
}

pub fn report(class: &str, asset: &str, severity: Severity, evidence: &str) -> Action {
    Action::ReportFinding(FindingReport {
        class: class.to_string(),
        asset: asset.to_string(),
        title: format!("{class} at {asset}"),
        severity,
        evidence: evidence.to_string(),
    })
}
