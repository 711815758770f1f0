//! The reasoning/act/observe loop of one agent
//!
//! An agent suspends in exactly three places: the reasoning call, a tool call,
//! and waiting on its children. Each of them is raced against the agent's
//! cancellation token and its deadline.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::action::Action;
use super::conversation::{Conversation, ConversationContext};
use super::prompts::Prompts;
use super::traits::{AgentId, AgentState, Budget, GraphControl, TerminationReason, TerminationResult};
use crate::events::EventSender;
use crate::providers::{Decision, ReasoningClient, ToolDefinition};
use crate::sandbox::EnvId;
use crate::state::{AuditSink, MetricsTracker, ObservationRecord, ToolCallRecord};
use crate::tools::{requires_sandbox, tool_definitions, ToolGateway, ToolResult};
use crate::{Error, Result};

/// Collaborators shared by every agent of a run
pub struct RunContext {
    pub reasoner: Arc<dyn ReasoningClient>,
    pub gateway: Arc<ToolGateway>,
    pub audit: Arc<dyn AuditSink>,
    pub events: Arc<dyn EventSender>,
    pub metrics: MetricsTracker,
    pub prompts: Arc<Prompts>,
    pub tool_timeout: Duration,
    pub max_reasoning_failures: u32,
}

/// Identity and budget of the agent a runner drives
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub id: AgentId,
    pub name: String,
    pub objective: String,
    pub parent: Option<AgentId>,
    pub budget: Budget,
}

impl AgentSpec {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Outcome of one suspension point
enum Interrupted<T> {
    Done(T),
    Stop(TerminationReason),
}

const CORRECTIVE_NOTICE: &str = "Your last response did not contain a tool call. \
Every response must end with exactly one <function=...> invocation.";

pub struct AgentRunner {
    spec: AgentSpec,
    ctx: Arc<RunContext>,
    graph: Arc<dyn GraphControl>,
    cancel: CancellationToken,
    conversation: Conversation,
    system_prompt: String,
    tools: Vec<ToolDefinition>,
    env: Option<EnvId>,
    steps_used: u32,
    reasoning_failures: u32,
}

impl AgentRunner {
    pub fn new(
        spec: AgentSpec,
        ctx: Arc<RunContext>,
        graph: Arc<dyn GraphControl>,
        cancel: CancellationToken,
    ) -> Self {
        let tools = tool_definitions(spec.is_root());
        let system_prompt = ctx.prompts.system_prompt(
            spec.is_root(),
            &spec.name,
            spec.id.as_str(),
            spec.budget.max_steps,
            &tools,
        );
        let conversation = Conversation::new(spec.objective.clone());
        Self {
            spec,
            ctx,
            graph,
            cancel,
            conversation,
            system_prompt,
            tools,
            env: None,
            steps_used: 0,
            reasoning_failures: 0,
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.spec.id
    }

    /// Drive the loop to a terminal result.
    ///
    /// `Err` is returned only for failures that abort the whole run.
    pub async fn run(mut self) -> Result<TerminationResult> {
        info!(agent = %self.spec.id, name = %self.spec.name, "Agent started");
        self.status(AgentState::Running, None);

        let (reason, summary) = loop {
            if self.cancel.is_cancelled() {
                break (TerminationReason::Cancelled, String::new());
            }
            if self.spec.budget.is_expired() {
                break (TerminationReason::Timeout, String::new());
            }
            if self.steps_used >= self.spec.budget.max_steps {
                break (
                    TerminationReason::BudgetExhausted,
                    format!("stopped after {} steps", self.steps_used),
                );
            }

            self.deliver_messages().await;

            let context = self.context();
            let decision = match self.suspend(self.ctx.reasoner.decide(&context)).await {
                Interrupted::Done(decision) => decision,
                Interrupted::Stop(reason) => break (reason, String::new()),
            };

            let decision = match decision {
                Ok(decision) => decision,
                Err(e) if e.is_infrastructure_failure() => return Err(e),
                Err(e) => {
                    self.reasoning_failures += 1;
                    self.ctx.metrics.record_reasoning_call(false);
                    warn!(
                        agent = %self.spec.id,
                        consecutive = self.reasoning_failures,
                        error = %e,
                        "Reasoning call failed"
                    );
                    if self.reasoning_failures >= self.ctx.max_reasoning_failures {
                        break (
                            TerminationReason::ReasoningFailure {
                                consecutive: self.reasoning_failures,
                            },
                            e.to_string(),
                        );
                    }
                    if matches!(e, Error::MalformedAction(_)) {
                        self.observe("system", false, CORRECTIVE_NOTICE.to_string()).await;
                    }
                    continue;
                }
            };

            self.reasoning_failures = 0;
            self.ctx.metrics.record_reasoning_call(true);
            self.ctx
                .metrics
                .record_tokens(decision.usage.input_tokens, decision.usage.output_tokens);

            if let Some(stop) = self.act(decision).await? {
                break stop;
            }
        };

        info!(
            agent = %self.spec.id,
            reason = %reason,
            steps = self.steps_used,
            "Agent finished"
        );
        Ok(TerminationResult::new(
            self.spec.id.clone(),
            self.spec.name.clone(),
            reason,
            summary,
            self.steps_used,
        ))
    }

    /// Execute one decided action; `Some` ends the loop
    async fn act(&mut self, decision: Decision) -> Result<Option<(TerminationReason, String)>> {
        let Decision { action, thought, raw, .. } = decision;
        if !thought.is_empty() {
            self.ctx.events.send_thinking(&self.spec.id, &thought);
        }
        self.conversation.reasoning(raw.clone());
        self.audit_observation("reasoning", raw).await;

        let caller = self.spec.id.clone();
        let gateway = Arc::clone(&self.ctx.gateway);
        match action {
            Action::ToolCall { name, args } => {
                if requires_sandbox(&name) && self.env.is_none() {
                    let acquired = self.suspend(gateway.pool().acquire(&caller)).await;
                    match acquired {
                        Interrupted::Done(Ok(env)) => {
                            debug!(agent = %caller, env = %env, "Sandbox acquired");
                            self.env = Some(env);
                        }
                        Interrupted::Done(Err(e)) => {
                            warn!(agent = %caller, error = %e, "Sandbox unavailable");
                            return Ok(Some((
                                TerminationReason::SandboxFailure {
                                    message: e.to_string(),
                                },
                                String::new(),
                            )));
                        }
                        Interrupted::Stop(reason) => return Ok(Some((reason, String::new()))),
                    }
                }

                let env = self.env.clone();
                let call = gateway.invoke(&caller, env.as_ref(), &name, &args, self.ctx.tool_timeout);
                self.tool_step(&name, Value::Object(args.clone()), call).await
            }
            Action::SpawnAgent(request) => {
                let args = serde_json::to_value(&request).unwrap_or(Value::Null);
                let call = async { Ok(gateway.spawn(&caller, request).await) };
                self.tool_step(super::SPAWN_TOOL, args, call).await
            }
            Action::ReportFinding(report) => {
                let args = serde_json::to_value(&report).unwrap_or(Value::Null);
                let call = gateway.report_finding(&caller, report);
                self.tool_step(super::REPORT_TOOL, args, call).await
            }
            Action::WaitForChildren => {
                if !self.graph.has_live_children(&self.spec.id).await {
                    // waiting with nothing to wait on still costs a step
                    self.steps_used += 1;
                }
                match self.await_children().await? {
                    Some(stop) => Ok(Some(stop)),
                    None => Ok(None),
                }
            }
            Action::Finish { success, summary } => {
                if self.graph.has_live_children(&self.spec.id).await {
                    info!(agent = %self.spec.id, "Finish requested with live children, waiting first");
                    return self.await_children().await;
                }
                let reason = if success {
                    TerminationReason::Completed
                } else {
                    TerminationReason::DeclaredFailure
                };
                Ok(Some((reason, summary)))
            }
        }
    }

    /// Run a step-consuming tool call, then audit and observe its result
    async fn tool_step(
        &mut self,
        tool: &str,
        args: Value,
        call: impl Future<Output = Result<ToolResult>>,
    ) -> Result<Option<(TerminationReason, String)>> {
        let step = self.steps_used + 1;
        let started_at = Utc::now();
        self.status(AgentState::Running, Some(tool));

        let result = match self.suspend(call).await {
            Interrupted::Done(Ok(result)) => result,
            Interrupted::Done(Err(e)) => return Err(e),
            Interrupted::Stop(reason) => return Ok(Some((reason, String::new()))),
        };
        self.steps_used = step;
        self.ctx.metrics.record_tool_call(result.success);
        self.status(AgentState::Running, None);

        let record = ToolCallRecord::new(&self.spec.id, step, tool, args, started_at, result.clone());
        if let Err(e) = self.ctx.audit.record_tool_call(&record).await {
            warn!(agent = %self.spec.id, tool, error = %e, "Failed to audit tool call");
        }

        if !result.success {
            self.ctx.events.send_feed(
                &self.spec.name,
                &format!("{tool} failed: {}", result.observation()),
                true,
            );
        }
        self.observe(tool, result.success, result.observation()).await;
        Ok(None)
    }

    /// Block until all children are terminal and append their results
    async fn await_children(&mut self) -> Result<Option<(TerminationReason, String)>> {
        self.status(AgentState::WaitingOnChildren, None);
        let graph = Arc::clone(&self.graph);
        let waited = self.suspend(graph.wait_for_children(&self.spec.id)).await;

        // the scheduler may have released the sandbox while this agent waited
        self.env = self.ctx.gateway.pool().env_for(&self.spec.id).await;

        let results = match waited {
            Interrupted::Done(Ok(results)) => results,
            Interrupted::Done(Err(Error::Cancelled(_))) => {
                return Ok(Some((TerminationReason::Cancelled, String::new())))
            }
            Interrupted::Done(Err(Error::Timeout(_))) => {
                return Ok(Some((TerminationReason::Timeout, String::new())))
            }
            Interrupted::Done(Err(e)) if e.is_infrastructure_failure() => return Err(e),
            Interrupted::Done(Err(e)) => {
                self.observe(super::WAIT_TOOLS[0], false, e.to_string()).await;
                return Ok(None);
            }
            Interrupted::Stop(reason) => return Ok(Some((reason, String::new()))),
        };
        self.status(AgentState::Running, None);

        let observation = if results.is_empty() {
            "You have no child agents to wait for.".to_string()
        } else {
            render_child_results(&results)
        };
        self.observe(super::WAIT_TOOLS[0], !results.is_empty(), observation).await;
        Ok(None)
    }

    async fn deliver_messages(&mut self) {
        let messages = self
            .ctx
            .gateway
            .knowledge()
            .drain_messages(&self.spec.id)
            .await;
        for message in messages {
            debug!(agent = %self.spec.id, from = %message.from, "Delivering message");
            self.conversation
                .notify(message.from.as_str(), message.content.clone());
            self.audit_observation(
                "notification",
                format!("from {}: {}", message.from, message.content),
            )
            .await;
        }
    }

    async fn observe(&mut self, tool: &str, success: bool, content: String) {
        self.conversation.observation(tool, success, content.clone());
        self.audit_observation("observation", content).await;
    }

    async fn audit_observation(&self, kind: &str, content: String) {
        let record = ObservationRecord {
            agent_id: self.spec.id.clone(),
            kind: kind.to_string(),
            content,
        };
        if let Err(e) = self.ctx.audit.record_observation(&record).await {
            warn!(agent = %self.spec.id, error = %e, "Failed to audit observation");
        }
    }

    fn context(&self) -> ConversationContext {
        ConversationContext {
            agent_id: self.spec.id.clone(),
            agent_name: self.spec.name.clone(),
            system_prompt: self.system_prompt.clone(),
            messages: self.conversation.to_messages(),
            tools: self.tools.clone(),
            steps_remaining: self.spec.budget.max_steps.saturating_sub(self.steps_used),
        }
    }

    fn status(&self, state: AgentState, tool: Option<&str>) {
        self.ctx.events.send_status(
            &self.spec.id,
            &self.spec.name,
            self.spec.parent.as_ref(),
            state,
            tool,
        );
    }

    /// Race a suspension point against cancellation and the deadline
    async fn suspend<T>(&self, fut: impl Future<Output = T>) -> Interrupted<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Interrupted::Stop(TerminationReason::Cancelled),
            _ = tokio::time::sleep_until(self.spec.budget.deadline) => {
                Interrupted::Stop(TerminationReason::Timeout)
            }
            out = fut => Interrupted::Done(out),
        }
    }
}

/// Children's results as one observation
pub fn render_child_results(results: &[TerminationResult]) -> String {
    let mut out = String::from("<agent_results>\n");
    for result in results {
        let summary = if result.summary.trim().is_empty() {
            "(no summary)"
        } else {
            result.summary.trim()
        };
        out.push_str(&format!(
            "<agent id=\"{}\" name=\"{}\" state=\"{}\" reason=\"{}\">\n{}\n</agent>\n",
            result.agent_id, result.name, result.state, result.reason, summary
        ));
    }
    out.push_str("</agent_results>");
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::agents::{SpawnRequest, Turn};
    use crate::config::SandboxPolicy;
    use crate::events::NoopEvents;
    use crate::knowledge::{AgentMessage, Finding, KnowledgeStore};
    use crate::providers::TokenUsage;
    use crate::sandbox::testing::FakeRuntime;
    use crate::sandbox::{PoolConfig, SandboxPool};
    use crate::state::{AgentRecord, SqliteAuditLog};
    use async_trait::async_trait;
    use serde_json::Map;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::Weak;

    /// Reasoner that replays a fixed list of outcomes, then repeats the fallback
    struct Scripted {
        script: Mutex<VecDeque<Result<Action>>>,
        fallback: Action,
        seen: Mutex<Vec<ConversationContext>>,
    }

    impl Scripted {
        fn new(script: Vec<Result<Action>>, fallback: Action) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ReasoningClient for Scripted {
        async fn decide(&self, context: &ConversationContext) -> Result<Decision> {
            self.seen.lock().unwrap().push(context.clone());
            let next = self.script.lock().unwrap().pop_front();
            let action = match next {
                Some(outcome) => outcome?,
                None => self.fallback.clone(),
            };
            Ok(Decision {
                raw: format!("<function={}></function>", action.tool_name()),
                thought: String::new(),
                action,
                usage: TokenUsage::default(),
            })
        }
    }

    /// Graph with no other agents
    struct Lonely;

    #[async_trait]
    impl GraphControl for Lonely {
        async fn admit(&self, _parent: Option<&AgentId>, _request: SpawnRequest) -> Result<AgentId> {
            Err(Error::CapacityExceeded("no capacity in this test".to_string()))
        }
        async fn has_live_children(&self, _parent: &AgentId) -> bool {
            false
        }
        async fn wait_for_children(&self, _parent: &AgentId) -> Result<Vec<TerminationResult>> {
            Ok(vec![])
        }
        async fn cancel_descendants(&self, _id: &AgentId) -> usize {
            0
        }
        async fn link_collaborators(&self, _from: &AgentId, _to: &AgentId) -> Result<()> {
            Ok(())
        }
        async fn render_graph(&self, _viewer: &AgentId) -> String {
            String::new()
        }
    }

    /// Audit sink whose writes always fail
    struct BrokenAudit;

    #[async_trait]
    impl AuditSink for BrokenAudit {
        async fn record_agent(&self, _record: &AgentRecord) -> Result<()> {
            Err(Error::Config("disk full".to_string()))
        }
        async fn record_tool_call(&self, _record: &ToolCallRecord) -> Result<()> {
            Err(Error::Config("disk full".to_string()))
        }
        async fn record_observation(&self, _record: &ObservationRecord) -> Result<()> {
            Err(Error::Config("disk full".to_string()))
        }
        async fn record_finding(&self, _finding: &Finding) -> Result<()> {
            Err(Error::Config("disk full".to_string()))
        }
    }

    fn terminal(command: &str) -> Action {
        let mut args = Map::new();
        args.insert("command".to_string(), Value::String(command.to_string()));
        Action::ToolCall {
            name: "terminal_execute".to_string(),
            args,
        }
    }

    struct Harness {
        ctx: Arc<RunContext>,
        audit: Arc<SqliteAuditLog>,
        reasoner: Arc<Scripted>,
        knowledge: KnowledgeStore,
    }

    fn harness(reasoner: Scripted, audit: Option<Arc<dyn AuditSink>>) -> Harness {
        harness_with(reasoner, audit, Arc::new(FakeRuntime::default()))
    }

    fn harness_with(
        reasoner: Scripted,
        audit: Option<Arc<dyn AuditSink>>,
        runtime: Arc<FakeRuntime>,
    ) -> Harness {
        let pool = Arc::new(SandboxPool::new(
            runtime,
            PoolConfig {
                run_id: "run-test".to_string(),
                policy: SandboxPolicy::PerAgent,
                max_environments: 2,
                grace_timeout: Duration::from_millis(50),
            },
        ));
        let knowledge = KnowledgeStore::new();
        let graph: Weak<dyn GraphControl> = Weak::<Lonely>::new();
        let gateway = Arc::new(ToolGateway::new(
            pool,
            knowledge.clone(),
            graph,
            Arc::new(NoopEvents),
        ));
        let sqlite = Arc::new(SqliteAuditLog::open_in_memory("run-test").unwrap());
        let reasoner = Arc::new(reasoner);
        let ctx = Arc::new(RunContext {
            reasoner: reasoner.clone(),
            gateway,
            audit: audit.unwrap_or_else(|| sqlite.clone() as Arc<dyn AuditSink>),
            events: Arc::new(NoopEvents),
            metrics: MetricsTracker::new(),
            prompts: Arc::new(Prompts::default()),
            tool_timeout: Duration::from_secs(30),
            max_reasoning_failures: 3,
        });
        Harness {
            ctx,
            audit: sqlite,
            reasoner,
            knowledge,
        }
    }

    fn spec(max_steps: u32) -> AgentSpec {
        AgentSpec {
            id: AgentId::from("agent_test"),
            name: "tester".to_string(),
            objective: "Probe http://shop.test".to_string(),
            parent: Some(AgentId::from("agent_root")),
            budget: Budget::new(max_steps, Duration::from_secs(600)),
        }
    }

    fn runner(h: &Harness, spec: AgentSpec, cancel: CancellationToken) -> AgentRunner {
        AgentRunner::new(spec, h.ctx.clone(), Arc::new(Lonely), cancel)
    }

    #[tokio::test]
    async fn test_budget_exhausted_after_exact_step_count() {
        let h = harness(Scripted::new(vec![], terminal("id")), None);
        let result = runner(&h, spec(5), CancellationToken::new()).run().await.unwrap();

        assert_eq!(result.reason, TerminationReason::BudgetExhausted);
        assert_eq!(result.state, AgentState::Failed);
        assert_eq!(result.steps_used, 5);

        let calls = h.audit.tool_calls_for(&AgentId::from("agent_test")).unwrap();
        assert_eq!(calls.len(), 5);
        assert_eq!(calls.iter().map(|c| c.0).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
        assert_eq!(h.ctx.metrics.snapshot().tool_calls, 5);
        assert_eq!(h.ctx.gateway.pool().outstanding().await, 1);
    }

    #[tokio::test]
    async fn test_finish_declares_outcome() {
        let finish = Action::Finish {
            success: false,
            summary: "target unreachable".to_string(),
        };
        let h = harness(Scripted::new(vec![Ok(terminal("curl shop.test"))], finish), None);
        let result = runner(&h, spec(10), CancellationToken::new()).run().await.unwrap();

        assert_eq!(result.reason, TerminationReason::DeclaredFailure);
        assert_eq!(result.summary, "target unreachable");
        assert_eq!(result.steps_used, 1);
    }

    #[tokio::test]
    async fn test_three_consecutive_reasoning_failures() {
        let provider_err = || Err(Error::Provider("503 service unavailable".to_string()));
        let h = harness(
            Scripted::new(
                vec![
                    provider_err(),
                    Ok(terminal("id")),
                    provider_err(),
                    Err(Error::MalformedAction("no tool call".to_string())),
                    provider_err(),
                ],
                terminal("id"),
            ),
            None,
        );
        let result = runner(&h, spec(10), CancellationToken::new()).run().await.unwrap();

        assert_eq!(
            result.reason,
            TerminationReason::ReasoningFailure { consecutive: 3 }
        );
        assert_eq!(result.steps_used, 1);
        let metrics = h.ctx.metrics.snapshot();
        assert_eq!(metrics.reasoning_failures, 4);
    }

    #[tokio::test]
    async fn test_malformed_action_appends_corrective_notice() {
        let finish = Action::Finish {
            success: true,
            summary: "done".to_string(),
        };
        let h = harness(
            Scripted::new(vec![Err(Error::MalformedAction("prose".to_string()))], finish),
            None,
        );
        let result = runner(&h, spec(10), CancellationToken::new()).run().await.unwrap();
        assert_eq!(result.reason, TerminationReason::Completed);

        let seen = h.reasoner.seen.lock().unwrap();
        let second = seen[1].messages.last().unwrap();
        assert!(second.content.contains("did not contain a tool call"));
    }

    #[tokio::test]
    async fn test_tool_error_is_an_observation_not_a_failure() {
        let finish = Action::Finish {
            success: true,
            summary: "done".to_string(),
        };
        let unknown = Action::ToolCall {
            name: "nmap_scan".to_string(),
            args: Map::new(),
        };
        let h = harness(Scripted::new(vec![Ok(unknown)], finish), None);
        let result = runner(&h, spec(10), CancellationToken::new()).run().await.unwrap();

        assert!(result.succeeded());
        let seen = h.reasoner.seen.lock().unwrap();
        let observation = &seen[1].messages.last().unwrap().content;
        assert!(observation.contains("status=\"error\""));
        assert!(observation.contains("unknown_tool"));
    }

    #[tokio::test]
    async fn test_cancel_stops_the_loop() {
        let h = harness(Scripted::new(vec![], terminal("id")), None);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = runner(&h, spec(10), cancel).run().await.unwrap();
        assert_eq!(result.reason, TerminationReason::Cancelled);
        assert_eq!(result.state, AgentState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires_during_tool_call() {
        let runtime = Arc::new(FakeRuntime::default());
        runtime.set_exec_delay(Duration::from_secs(30));
        let h = harness_with(Scripted::new(vec![], terminal("sleep 999")), None, runtime);
        let mut spec = spec(10);
        spec.budget = Budget::new(10, Duration::from_secs(1));

        let result = runner(&h, spec, CancellationToken::new()).run().await.unwrap();
        assert_eq!(result.reason, TerminationReason::Timeout);
        assert_eq!(result.steps_used, 0);
    }

    #[tokio::test]
    async fn test_inbox_messages_become_notifications() {
        let finish = Action::Finish {
            success: true,
            summary: "done".to_string(),
        };
        let h = harness(Scripted::new(vec![], finish), None);
        h.knowledge
            .send_message(AgentMessage {
                from: AgentId::from("agent_peer"),
                to: AgentId::from("agent_test"),
                content: "admin panel at /admin".to_string(),
                sent_at: Utc::now(),
            })
            .await
            .unwrap();

        runner(&h, spec(10), CancellationToken::new()).run().await.unwrap();
        let seen = h.reasoner.seen.lock().unwrap();
        let last = &seen[0].messages.last().unwrap().content;
        assert!(last.contains("inter_agent_message from=\"agent_peer\""));
        assert!(last.contains("/admin"));
    }

    #[tokio::test]
    async fn test_audit_failure_is_not_fatal() {
        let finish = Action::Finish {
            success: true,
            summary: "done".to_string(),
        };
        let h = harness(
            Scripted::new(vec![Ok(terminal("id")), Ok(terminal("whoami"))], finish),
            Some(Arc::new(BrokenAudit)),
        );
        let result = runner(&h, spec(10), CancellationToken::new()).run().await.unwrap();
        assert!(result.succeeded());
        assert_eq!(result.steps_used, 2);
    }

    #[tokio::test]
    async fn test_wait_without_children_costs_a_step() {
        let h = harness(Scripted::new(vec![], Action::WaitForChildren), None);
        let result = runner(&h, spec(3), CancellationToken::new()).run().await.unwrap();
        assert_eq!(result.reason, TerminationReason::BudgetExhausted);
        assert_eq!(result.steps_used, 3);
    }

    #[test]
    fn test_render_child_results() {
        let results = vec![
            TerminationResult::new(
                AgentId::from("agent_a"),
                "sqli",
                TerminationReason::Completed,
                "confirmed SQLi on /login",
                12,
            ),
            TerminationResult::new(AgentId::from("agent_b"), "xss", TerminationReason::Timeout, "", 40),
        ];
        let rendered = render_child_results(&results);
        assert!(rendered.starts_with("<agent_results>"));
        assert!(rendered.contains("state=\"succeeded\" reason=\"completed\""));
        assert!(rendered.contains("confirmed SQLi on /login"));
        assert!(rendered.contains("state=\"failed\" reason=\"deadline expired\""));
        assert!(rendered.contains("(no summary)"));
    }

    #[test]
    fn test_turn_kinds_are_distinct() {
        let mut conversation = Conversation::new("task");
        conversation.notify("agent_peer", "hi");
        assert!(matches!(conversation.last(), Some(Turn::Notification { .. })));
    }
}
