//! Scheduler: admits agents under the concurrency ceiling, drives their
//! lifecycle, propagates cancellation and detects global termination.
//!
//! Every agent runs as its own task. A task first waits in the admission queue
//! for a slot, then drives an [`AgentRunner`] and reports its result through
//! `on_terminal`. An agent holds its slot only while Running; a parent waiting
//! on its children gives the slot (and its sandbox) back and takes a slot again
//! before it resumes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::arena::{AgentArena, AgentNode, AgentSnapshot};
use crate::agents::{
    AgentId, AgentRunner, AgentSpec, AgentState, Budget, GraphControl, Prompts, RunContext,
    SpawnRequest, TerminationReason, TerminationResult,
};
use crate::config::RunConfig;
use crate::events::EventSender;
use crate::knowledge::KnowledgeStore;
use crate::providers::ReasoningClient;
use crate::sandbox::SandboxPool;
use crate::state::{AgentRecord, AuditSink, MetricsTracker};
use crate::tools::ToolGateway;
use crate::{Error, Result};

/// Everything the scheduler needs from outside the graph
pub struct SchedulerDeps {
    pub reasoner: Arc<dyn ReasoningClient>,
    pub pool: Arc<SandboxPool>,
    pub knowledge: KnowledgeStore,
    pub audit: Arc<dyn AuditSink>,
    pub events: Arc<dyn EventSender>,
    pub metrics: MetricsTracker,
    pub prompts: Arc<Prompts>,
}

/// Final state of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub root: Option<TerminationResult>,
    /// Every agent's result, in admission order
    pub results: Vec<TerminationResult>,
    pub agents: Vec<AgentSnapshot>,
    /// Set when an infrastructure failure aborted the run
    pub aborted: Option<String>,
    pub peak_running: usize,
}

impl RunOutcome {
    pub fn failed_agents(&self) -> usize {
        self.results.iter().filter(|r| !r.succeeded()).count()
    }
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    max_queued: usize,
    root_max_steps: u32,
    child_max_steps: u32,
    run_timeout: Duration,
}

pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    this: Weak<SchedulerInner>,
    ctx: Arc<RunContext>,
    arena: Mutex<AgentArena>,
    admission: Arc<Semaphore>,
    limits: Limits,
    run_token: CancellationToken,
    /// Bumped on every graph change; waiters re-check their predicate
    changes: watch::Sender<u64>,
    peak_running: AtomicUsize,
    aborted: Mutex<Option<String>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(config: &RunConfig, deps: SchedulerDeps) -> Self {
        let ceiling = config.effective_agent_ceiling().max(1);
        let limits = Limits {
            max_queued: config.limits.max_queued,
            root_max_steps: config.limits.root_max_steps,
            child_max_steps: config.limits.child_max_steps,
            run_timeout: config.run_timeout(),
        };
        let tool_timeout = config.tool_timeout();
        let max_reasoning_failures = config.limits.max_reasoning_failures.max(1);

        let inner = Arc::new_cyclic(|this: &Weak<SchedulerInner>| {
            let graph: Weak<dyn GraphControl> = this.clone();
            let gateway = Arc::new(ToolGateway::new(
                deps.pool,
                deps.knowledge,
                graph,
                Arc::clone(&deps.events),
            ));
            let ctx = Arc::new(RunContext {
                reasoner: deps.reasoner,
                gateway,
                audit: deps.audit,
                events: deps.events,
                metrics: deps.metrics,
                prompts: deps.prompts,
                tool_timeout,
                max_reasoning_failures,
            });
            let (changes, _) = watch::channel(0);
            SchedulerInner {
                this: this.clone(),
                ctx,
                arena: Mutex::new(AgentArena::new()),
                admission: Arc::new(Semaphore::new(ceiling)),
                limits,
                run_token: CancellationToken::new(),
                changes,
                peak_running: AtomicUsize::new(0),
                aborted: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }
        });
        info!(ceiling, max_queued = limits.max_queued, "Scheduler ready");
        Self { inner }
    }

    pub fn gateway(&self) -> &Arc<ToolGateway> {
        &self.inner.ctx.gateway
    }

    pub fn knowledge(&self) -> &KnowledgeStore {
        self.inner.ctx.gateway.knowledge()
    }

    pub fn pool(&self) -> &Arc<SandboxPool> {
        self.inner.ctx.gateway.pool()
    }

    pub fn metrics(&self) -> &MetricsTracker {
        &self.inner.ctx.metrics
    }

    /// Admit the root agent and drive the run until the whole graph is terminal
    pub async fn run(&self, name: &str, objective: &str) -> Result<RunOutcome> {
        let root = self
            .inner
            .admit_node(None, SpawnRequest::new(name, objective))
            .await?;
        info!(root = %root, "Run started");

        self.inner.wait_subtree_terminal(&root).await;
        self.join_tasks().await;

        let outcome = self.outcome().await;
        info!(
            agents = outcome.results.len(),
            failed = outcome.failed_agents(),
            peak_running = outcome.peak_running,
            aborted = outcome.aborted.is_some(),
            "Run finished"
        );
        Ok(outcome)
    }

    /// Admit an agent; returns once it is queued, not once it runs
    pub async fn admit(&self, parent: Option<&AgentId>, request: SpawnRequest) -> Result<AgentId> {
        self.inner.admit_node(parent, request).await
    }

    /// Cancel `id` and every descendant; returns how many agents were cancelled
    pub async fn cancel_subtree(&self, id: &AgentId) -> Result<usize> {
        let ids = {
            let arena = self.inner.arena.lock().await;
            if !arena.contains(id) {
                return Err(Error::AgentNotFound(id.to_string()));
            }
            let mut ids = arena.descendants_post_order(id);
            ids.push(id.clone());
            ids
        };
        Ok(self.inner.cancel_nodes(ids, TerminationReason::Cancelled).await)
    }

    /// Cancel the whole run and refuse further admissions
    pub async fn cancel_run(&self) -> usize {
        info!("Cancelling run");
        self.inner.run_token.cancel();
        let root = self.inner.arena.lock().await.root().map(|n| n.id.clone());
        match root {
            Some(root) => self.cancel_subtree(&root).await.unwrap_or(0),
            None => 0,
        }
    }

    /// Abort the run after an infrastructure failure
    pub async fn abort(&self, message: &str) {
        self.inner.abort(message.to_string()).await;
    }

    pub async fn snapshot(&self) -> Vec<AgentSnapshot> {
        self.inner.arena.lock().await.snapshot()
    }

    pub async fn state_of(&self, id: &AgentId) -> Option<AgentState> {
        self.inner.arena.lock().await.get(id).map(|n| n.state)
    }

    pub async fn render(&self) -> String {
        self.inner.arena.lock().await.render(None)
    }

    /// Agents currently holding an admission slot
    pub async fn running(&self) -> usize {
        self.inner.arena.lock().await.holding_permits()
    }

    /// Highest number of agents that held a slot at the same time
    pub fn peak_running(&self) -> usize {
        self.inner.peak_running.load(Ordering::SeqCst)
    }

    pub fn is_terminating(&self) -> bool {
        self.inner.run_token.is_cancelled()
    }

    /// Receiver that changes whenever the graph does
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.changes.subscribe()
    }

    async fn join_tasks(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.inner.tasks.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Agent supervisor task failed");
            }
        }
    }

    async fn outcome(&self) -> RunOutcome {
        let arena = self.inner.arena.lock().await;
        RunOutcome {
            root: arena.root().and_then(|n| n.result.clone()),
            results: arena.iter().filter_map(|n| n.result.clone()).collect(),
            agents: arena.snapshot(),
            aborted: self.inner.aborted.lock().await.clone(),
            peak_running: self.peak_running(),
        }
    }
}

impl SchedulerInner {
    fn bump(&self) {
        self.changes.send_modify(|generation| *generation += 1);
    }

    async fn admit_node(&self, parent: Option<&AgentId>, request: SpawnRequest) -> Result<AgentId> {
        if self.run_token.is_cancelled() {
            return Err(Error::CapacityExceeded(
                "the run is terminating; no new agents are admitted".to_string(),
            ));
        }

        let id = AgentId::generate();
        let token = self.run_token.child_token();
        let objective = match &request.context {
            Some(context) if !context.trim().is_empty() => {
                format!("{}\n\nContext from your parent:\n{}", request.objective, context)
            }
            _ => request.objective.clone(),
        };

        let spec = {
            let mut arena = self.arena.lock().await;
            let budget = match parent {
                None => {
                    if arena.root().is_some() {
                        return Err(Error::Config("the run already has a root agent".to_string()));
                    }
                    Budget::new(
                        request.max_steps.unwrap_or(self.limits.root_max_steps),
                        self.limits.run_timeout,
                    )
                }
                Some(parent_id) => {
                    let parent_node = arena
                        .get(parent_id)
                        .ok_or_else(|| Error::AgentNotFound(parent_id.to_string()))?;
                    if parent_node.state.is_terminal() || parent_node.token.is_cancelled() {
                        return Err(Error::CapacityExceeded(format!(
                            "{parent_id} is terminating and cannot spawn"
                        )));
                    }
                    parent_node.budget.for_child(
                        request.max_steps.unwrap_or(self.limits.child_max_steps),
                        request.timeout,
                    )
                }
            };

            let queued = arena.count_in(AgentState::Pending);
            if self.admission.available_permits() <= queued && queued >= self.limits.max_queued {
                return Err(Error::CapacityExceeded(format!(
                    "{queued} agents are already waiting for a slot"
                )));
            }

            let node = AgentNode::new(
                id.clone(),
                request.name.clone(),
                objective,
                parent.cloned(),
                budget,
                token.clone(),
            );
            let spec = AgentSpec {
                id: node.id.clone(),
                name: node.name.clone(),
                objective: node.objective.clone(),
                parent: node.parent.clone(),
                budget,
            };
            arena.insert(node);
            spec
        };

        debug!(agent = %id, parent = ?parent, name = %spec.name, "Agent admitted");
        self.ctx.metrics.record_agent_spawned();
        self.record(&spec, AgentState::Pending, None).await;
        self.bump();
        self.launch(spec, token).await;
        Ok(id)
    }

    async fn launch(&self, spec: AgentSpec, token: CancellationToken) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let handle = tokio::spawn(async move {
            let (id, name) = (spec.id.clone(), spec.name.clone());
            let body = tokio::spawn(Arc::clone(&this).drive(spec, token));
            if let Err(e) = body.await {
                // a panicking agent still has to leave the graph, or its parent waits forever
                error!(agent = %id, error = %e, "Agent task panicked");
                let result = TerminationResult::new(
                    id.clone(),
                    name,
                    TerminationReason::Crashed {
                        message: e.to_string(),
                    },
                    "",
                    0,
                );
                this.on_terminal(&id, result).await;
            }
        });
        self.tasks.lock().await.push(handle);
    }

    /// Body of an agent task: queue for a slot, run, report
    async fn drive(self: Arc<Self>, spec: AgentSpec, token: CancellationToken) {
        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = tokio::time::sleep_until(spec.budget.deadline) => {
                let result = TerminationResult::new(
                    spec.id.clone(),
                    spec.name.clone(),
                    TerminationReason::Timeout,
                    "deadline expired while waiting for a slot",
                    0,
                );
                self.on_terminal(&spec.id, result).await;
                return;
            }
            permit = Arc::clone(&self.admission).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        {
            let mut arena = self.arena.lock().await;
            let Some(node) = arena.get_mut(&spec.id) else {
                return;
            };
            if node.state.is_terminal() {
                return;
            }
            node.state = AgentState::Running;
            node.permit = Some(permit);
            let holding = arena.holding_permits();
            self.peak_running.fetch_max(holding, Ordering::SeqCst);
        }
        self.record(&spec, AgentState::Running, None).await;
        self.bump();

        let graph: Arc<dyn GraphControl> = self.clone();
        let runner = AgentRunner::new(spec.clone(), Arc::clone(&self.ctx), graph, token);
        match runner.run().await {
            Ok(result) => self.on_terminal(&spec.id, result).await,
            Err(e) => {
                error!(agent = %spec.id, error = %e, "Infrastructure failure, aborting run");
                let message = e.to_string();
                let result = TerminationResult::new(
                    spec.id.clone(),
                    spec.name.clone(),
                    TerminationReason::Aborted {
                        message: message.clone(),
                    },
                    "",
                    0,
                );
                self.on_terminal(&spec.id, result).await;
                self.abort(message).await;
            }
        }
    }

    /// Finalize an agent; terminal agents are never rewritten
    async fn on_terminal(&self, id: &AgentId, result: TerminationResult) {
        let (spec, live_descendants) = {
            let mut arena = self.arena.lock().await;
            let Some(node) = arena.get_mut(id) else {
                return;
            };
            if node.state.is_terminal() {
                // cancelled from outside; keep the recorded reason, take the real step count
                if let Some(recorded) = node.result.as_mut() {
                    recorded.steps_used = recorded.steps_used.max(result.steps_used);
                }
                debug!(agent = %id, "Result arrived after the agent was finalized");
                drop(arena);
                // a sandbox acquired while the cancellation raced in
                self.release_sandbox(id).await;
                return;
            }
            node.state = result.state;
            node.result = Some(result.clone());
            node.permit = None;
            node.current_tool = None;
            node.token.cancel();
            let spec = spec_of(node);
            let live: Vec<AgentId> = arena
                .descendants_post_order(id)
                .into_iter()
                .filter(|d| arena.get(d).is_some_and(|n| !n.state.is_terminal()))
                .collect();
            (spec, live)
        };

        if !live_descendants.is_empty() {
            info!(
                agent = %id,
                reason = %result.reason,
                descendants = live_descendants.len(),
                "Agent ended with live descendants, cancelling them"
            );
            self.cancel_nodes(live_descendants, TerminationReason::Cancelled)
                .await;
        }

        self.release_sandbox(id).await;
        self.record(&spec, result.state, Some(&result)).await;
        self.ctx.events.send_result(&result);
        self.ctx.events.send_metrics(&self.ctx.metrics.snapshot());
        self.bump();
    }

    /// Finalize `ids` (children before parents) and release their sandboxes bottom-up
    async fn cancel_nodes(&self, ids: Vec<AgentId>, reason: TerminationReason) -> usize {
        let mut finalized = Vec::new();
        {
            let mut arena = self.arena.lock().await;
            for id in ids {
                let Some(node) = arena.get_mut(&id) else {
                    continue;
                };
                if node.state.is_terminal() {
                    continue;
                }
                let result = TerminationResult::new(
                    node.id.clone(),
                    node.name.clone(),
                    reason.clone(),
                    "",
                    0,
                );
                node.state = result.state;
                node.result = Some(result.clone());
                node.permit = None;
                node.current_tool = None;
                node.token.cancel();
                finalized.push((spec_of(node), result));
            }
        }

        for (spec, result) in &finalized {
            debug!(agent = %spec.id, reason = %reason, "Agent cancelled");
            self.release_sandbox(&spec.id).await;
            self.record(spec, result.state, Some(result)).await;
            self.ctx.events.send_result(result);
        }
        if !finalized.is_empty() {
            self.bump();
        }
        finalized.len()
    }

    async fn abort(&self, message: String) {
        {
            let mut aborted = self.aborted.lock().await;
            if aborted.is_some() {
                return;
            }
            *aborted = Some(message.clone());
        }
        self.run_token.cancel();
        let ids = {
            let arena = self.arena.lock().await;
            match arena.root() {
                Some(root) => {
                    let mut ids = arena.descendants_post_order(&root.id);
                    ids.push(root.id.clone());
                    ids
                }
                None => Vec::new(),
            }
        };
        let count = self
            .cancel_nodes(ids, TerminationReason::Aborted { message })
            .await;
        warn!(agents = count, "Run aborted");
    }

    async fn release_sandbox(&self, id: &AgentId) {
        if let Err(e) = self.ctx.gateway.pool().release_agent(id).await {
            warn!(agent = %id, error = %e, "Sandbox release failed, left for the final sweep");
        }
    }

    async fn wait_subtree_terminal(&self, root: &AgentId) {
        let mut rx = self.changes.subscribe();
        loop {
            if self.arena.lock().await.subtree_terminal(root) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Results of finished children not yet handed to `parent`
    fn take_undelivered(arena: &mut AgentArena, parent: &AgentId) -> Vec<TerminationResult> {
        let Some(node) = arena.get(parent) else {
            return Vec::new();
        };
        let results: Vec<TerminationResult> = node
            .children
            .iter()
            .filter(|c| !node.delivered.contains(*c))
            .filter_map(|c| arena.get(c).and_then(|child| child.result.clone()))
            .collect();
        if let Some(node) = arena.get_mut(parent) {
            node.delivered
                .extend(results.iter().map(|r| r.agent_id.clone()));
        }
        results
    }

    async fn record(&self, spec: &AgentSpec, state: AgentState, result: Option<&TerminationResult>) {
        self.ctx
            .events
            .send_status(&spec.id, &spec.name, spec.parent.as_ref(), state, None);
        let record = AgentRecord {
            agent_id: spec.id.clone(),
            parent_id: spec.parent.clone(),
            name: spec.name.clone(),
            objective: spec.objective.clone(),
            state,
            reason: result.map(|r| r.reason.clone()),
            summary: result.map(|r| r.summary.clone()),
            steps_used: result.map_or(0, |r| r.steps_used),
        };
        if let Err(e) = self.ctx.audit.record_agent(&record).await {
            warn!(agent = %spec.id, error = %e, "Failed to audit agent state");
        }
    }
}

fn spec_of(node: &AgentNode) -> AgentSpec {
    AgentSpec {
        id: node.id.clone(),
        name: node.name.clone(),
        objective: node.objective.clone(),
        parent: node.parent.clone(),
        budget: node.budget,
    }
}

#[async_trait]
impl GraphControl for SchedulerInner {
    async fn admit(&self, parent: Option<&AgentId>, request: SpawnRequest) -> Result<AgentId> {
        self.admit_node(parent, request).await
    }

    async fn has_live_children(&self, parent: &AgentId) -> bool {
        !self.arena.lock().await.live_children(parent).is_empty()
    }

    async fn wait_for_children(&self, parent: &AgentId) -> Result<Vec<TerminationResult>> {
        let mut rx = self.changes.subscribe();
        let (spec, token) = {
            let mut arena = self.arena.lock().await;
            if !arena.contains(parent) {
                return Err(Error::AgentNotFound(parent.to_string()));
            }
            if arena.live_children(parent).is_empty() {
                return Ok(Self::take_undelivered(&mut arena, parent));
            }
            let Some(node) = arena.get_mut(parent) else {
                return Err(Error::AgentNotFound(parent.to_string()));
            };
            node.state = AgentState::WaitingOnChildren;
            node.permit = None;
            (spec_of(node), node.token.clone())
        };
        debug!(agent = %parent, "Waiting on children");
        self.record(&spec, AgentState::WaitingOnChildren, None).await;
        self.release_sandbox(parent).await;
        self.bump();

        loop {
            if self.arena.lock().await.live_children(parent).is_empty() {
                break;
            }
            tokio::select! {
                _ = token.cancelled() => {
                    return Err(Error::Cancelled(format!("{parent} was cancelled while waiting")));
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(Error::Cancelled("scheduler stopped".to_string()));
                    }
                }
            }
        }

        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Err(Error::Cancelled(format!("{parent} was cancelled while resuming")));
            }
            _ = tokio::time::sleep_until(spec.budget.deadline) => {
                return Err(Error::Timeout(format!("{parent} ran out of time waiting for a slot")));
            }
            permit = Arc::clone(&self.admission).acquire_owned() => {
                permit.map_err(|_| Error::Cancelled("admission closed".to_string()))?
            }
        };

        let results = {
            let mut arena = self.arena.lock().await;
            let Some(node) = arena.get_mut(parent) else {
                return Err(Error::AgentNotFound(parent.to_string()));
            };
            if node.state.is_terminal() {
                return Err(Error::Cancelled(format!("{parent} ended while resuming")));
            }
            node.state = AgentState::Running;
            node.permit = Some(permit);
            let holding = arena.holding_permits();
            self.peak_running.fetch_max(holding, Ordering::SeqCst);
            Self::take_undelivered(&mut arena, parent)
        };
        debug!(agent = %parent, children = results.len(), "Resuming with child results");
        self.record(&spec, AgentState::Running, None).await;
        self.bump();
        Ok(results)
    }

    async fn cancel_descendants(&self, id: &AgentId) -> usize {
        let ids = self.arena.lock().await.descendants_post_order(id);
        self.cancel_nodes(ids, TerminationReason::Cancelled).await
    }

    async fn link_collaborators(&self, from: &AgentId, to: &AgentId) -> Result<()> {
        let mut arena = self.arena.lock().await;
        if !arena.contains(from) {
            return Err(Error::AgentNotFound(from.to_string()));
        }
        match arena.get(to) {
            None => return Err(Error::AgentNotFound(to.to_string())),
            Some(node) if node.state.is_terminal() => {
                return Err(Error::Tool(format!(
                    "agent {to} has already finished ({})",
                    node.state
                )))
            }
            Some(_) => {}
        }
        arena.link(from, to);
        Ok(())
    }

    async fn render_graph(&self, viewer: &AgentId) -> String {
        self.arena.lock().await.render(Some(viewer))
    }
}
