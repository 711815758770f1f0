//! Single entry point from an agent's decision to the capability that executes it
//!
//! Sandbox tools run against the caller's environment, one call at a time per
//! environment. Knowledge tools go to the shared store and graph tools to the
//! scheduler. Every failure the agent can react to comes back as a failed
//! `ToolResult`; only infrastructure failures surface as `Err`.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::definitions::*;
use super::result::{truncate_output, ToolErrorKind, ToolResult, MAX_OBSERVATION_BYTES};
use crate::agents::{arg_str, AgentId, FindingReport, GraphControl, SpawnRequest};
use crate::events::EventSender;
use crate::knowledge::{AgentMessage, FindingSubmission, KnowledgeStore, ReportOutcome};
use crate::sandbox::{CapabilityOutput, CapabilityRequest, EnvId, SandboxPool};
use crate::{Error, Result};

/// How long a timed-out call's interrupt may take before it is abandoned
const INTERRUPT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ToolGateway {
    pool: Arc<SandboxPool>,
    knowledge: KnowledgeStore,
    graph: Weak<dyn GraphControl>,
    events: Arc<dyn EventSender>,
}

impl ToolGateway {
    pub fn new(
        pool: Arc<SandboxPool>,
        knowledge: KnowledgeStore,
        graph: Weak<dyn GraphControl>,
        events: Arc<dyn EventSender>,
    ) -> Self {
        Self {
            pool,
            knowledge,
            graph,
            events,
        }
    }

    pub fn pool(&self) -> &Arc<SandboxPool> {
        &self.pool
    }

    pub fn knowledge(&self) -> &KnowledgeStore {
        &self.knowledge
    }

    fn graph(&self) -> std::result::Result<Arc<dyn GraphControl>, ToolResult> {
        self.graph.upgrade().ok_or_else(|| {
            ToolResult::failure(ToolErrorKind::Cancelled, "the run is shutting down")
        })
    }

    /// Execute one named tool for `caller`.
    ///
    /// `env_id` must be the caller's environment for sandbox tools and is ignored otherwise.
    pub async fn invoke(
        &self,
        caller: &AgentId,
        env_id: Option<&EnvId>,
        name: &str,
        args: &Map<String, Value>,
        timeout: Duration,
    ) -> Result<ToolResult> {
        debug!(agent = %caller, tool = name, "Invoking tool");

        if requires_sandbox(name) {
            let request = match capability_request(name, args) {
                Ok(request) => request,
                Err(e) => return Ok(e.into()),
            };
            let Some(env_id) = env_id else {
                return Ok(ToolResult::failure(
                    ToolErrorKind::Sandbox,
                    "no sandbox environment is bound to this agent",
                ));
            };
            return Ok(self.execute_in_sandbox(env_id, &request, timeout).await);
        }

        match name {
            ADD_NOTE => self.add_note(caller, args).await,
            QUERY_NOTES => self.query_notes(args).await,
            SEND_MESSAGE => self.send_message(caller, args).await,
            VIEW_AGENT_GRAPH => Ok(match self.graph() {
                Ok(graph) => ToolResult::ok(graph.render_graph(caller).await),
                Err(result) => result,
            }),
            CREATE_AGENT => match SpawnRequest::from_args(args) {
                Ok(request) => Ok(self.spawn(caller, request).await),
                Err(e) => Ok(e.into()),
            },
            CREATE_REPORT => match FindingReport::from_args(args) {
                Ok(report) => self.report_finding(caller, report).await,
                Err(e) => Ok(e.into()),
            },
            _ => Ok(ToolResult::failure(
                ToolErrorKind::UnknownTool,
                format!("no tool named '{name}'"),
            )),
        }
    }

    /// Run a capability call, serialized against every other call on the same environment
    pub async fn execute_in_sandbox(
        &self,
        env_id: &EnvId,
        request: &CapabilityRequest,
        timeout: Duration,
    ) -> ToolResult {
        let checkout = match self.pool.checkout(env_id).await {
            Ok(checkout) => checkout,
            Err(e) => return e.into(),
        };

        let _turn = checkout.exec_lock.lock().await;
        // the environment may have been released while this call waited its turn
        if let Err(e) = self.pool.checkout(env_id).await {
            return e.into();
        }
        self.pool.mark_in_use(env_id, true).await;

        let runtime = self.pool.runtime();
        let outcome =
            tokio::time::timeout(timeout, runtime.execute(&checkout.handle, request)).await;

        self.pool.mark_in_use(env_id, false).await;

        match outcome {
            Ok(Ok(output)) => capability_result(request, output),
            Ok(Err(e)) => {
                warn!(env = %env_id, capability = request.capability(), error = %e, "Capability call failed");
                e.into()
            }
            Err(_) => {
                warn!(
                    env = %env_id,
                    capability = request.capability(),
                    timeout_secs = timeout.as_secs(),
                    "Capability call timed out, interrupting"
                );
                match tokio::time::timeout(INTERRUPT_TIMEOUT, runtime.interrupt(&checkout.handle))
                    .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!(env = %env_id, error = %e, "Interrupt after timeout failed"),
                    Err(_) => debug!(env = %env_id, "Interrupt after timeout did not return"),
                }
                ToolResult::failure(
                    ToolErrorKind::Timeout,
                    format!(
                        "{} call exceeded {}s and was interrupted",
                        request.capability(),
                        timeout.as_secs()
                    ),
                )
            }
        }
    }

    /// Admit a child of `caller`; may wait in the admission queue
    pub async fn spawn(&self, caller: &AgentId, request: SpawnRequest) -> ToolResult {
        let graph = match self.graph() {
            Ok(graph) => graph,
            Err(result) => return result,
        };
        let name = request.name.clone();
        match graph.admit(Some(caller), request).await {
            Ok(child) => {
                info!(parent = %caller, child = %child, name = %name, "Child agent admitted");
                ToolResult::ok(json!({
                    "agent_id": child.as_str(),
                    "name": name,
                    "status": "admitted",
                    "note": "Call wait_for_children to collect results once you have spawned every child you need."
                }))
            }
            Err(e) => e.into(),
        }
    }

    /// Submit a finding to the knowledge store
    pub async fn report_finding(&self, caller: &AgentId, report: FindingReport) -> Result<ToolResult> {
        let submission = FindingSubmission {
            class: report.class,
            asset: report.asset,
            title: report.title,
            severity: report.severity,
            evidence: report.evidence,
            agent_id: caller.clone(),
        };

        match self.knowledge.report_finding(submission).await {
            Ok(outcome) => {
                let finding = outcome.finding();
                if let ReportOutcome::Created(created) = &outcome {
                    self.events.send_finding(created);
                }
                Ok(ToolResult::ok(json!({
                    "status": outcome.as_str(),
                    "finding_id": finding.id,
                    "key": finding.key.to_string(),
                    "severity": finding.severity.to_string(),
                    "evidence_count": finding.evidence.len(),
                })))
            }
            Err(e) if e.is_infrastructure_failure() => Err(e),
            Err(e) => Ok(e.into()),
        }
    }

    async fn add_note(&self, caller: &AgentId, args: &Map<String, Value>) -> Result<ToolResult> {
        let (Some(tag), Some(text)) = (arg_str(args, &["tag", "topic"]), arg_str(args, &["text", "content", "note"]))
        else {
            return Ok(ToolResult::failure(
                ToolErrorKind::InvalidArguments,
                "add_note requires 'tag' and 'text'",
            ));
        };

        match self.knowledge.note(&tag, &text, caller).await {
            Ok(position) => Ok(ToolResult::ok(format!(
                "Note #{} filed under '{}'",
                position + 1,
                tag.trim().to_lowercase()
            ))),
            Err(e) if e.is_infrastructure_failure() => Err(e),
            Err(e) => Ok(e.into()),
        }
    }

    async fn query_notes(&self, args: &Map<String, Value>) -> Result<ToolResult> {
        let Some(tag) = arg_str(args, &["tag", "topic"]).filter(|t| !t.trim().is_empty()) else {
            let tags = self.knowledge.tags().await;
            return Ok(ToolResult::ok(if tags.is_empty() {
                "No notes have been filed yet.".to_string()
            } else {
                format!("Tags with notes: {}", tags.join(", "))
            }));
        };

        match self.knowledge.query(&tag).await {
            Ok(notes) if notes.is_empty() => Ok(ToolResult::ok(format!("No notes under '{tag}'."))),
            Ok(notes) => {
                let rendered = notes
                    .iter()
                    .map(|n| {
                        format!(
                            "[{}] {}: {}",
                            n.created_at.format("%H:%M:%S"),
                            n.agent_id,
                            n.text
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(ToolResult::ok(rendered))
            }
            Err(e) if e.is_infrastructure_failure() => Err(e),
            Err(e) => Ok(e.into()),
        }
    }

    async fn send_message(&self, caller: &AgentId, args: &Map<String, Value>) -> Result<ToolResult> {
        let (Some(target), Some(content)) = (
            arg_str(args, &["target_agent_id", "agent_id", "to"]),
            arg_str(args, &["message", "content"]),
        ) else {
            return Ok(ToolResult::failure(
                ToolErrorKind::InvalidArguments,
                "send_message_to_agent requires 'target_agent_id' and 'message'",
            ));
        };
        let target = AgentId::from(target.trim());
        if target == *caller {
            return Ok(ToolResult::failure(
                ToolErrorKind::InvalidArguments,
                "cannot send a message to yourself",
            ));
        }

        let graph = match self.graph() {
            Ok(graph) => graph,
            Err(result) => return Ok(result),
        };
        if let Err(e) = graph.link_collaborators(caller, &target).await {
            return Ok(e.into());
        }

        let message = AgentMessage {
            from: caller.clone(),
            to: target.clone(),
            content,
            sent_at: Utc::now(),
        };
        match self.knowledge.send_message(message).await {
            Ok(()) => Ok(ToolResult::ok(format!("Message delivered to {target}"))),
            Err(e) if e.is_infrastructure_failure() => Err(e),
            Err(e) => Ok(e.into()),
        }
    }
}

/// Translate sandbox tool arguments into a capability request
pub fn capability_request(name: &str, args: &Map<String, Value>) -> Result<CapabilityRequest> {
    let missing = |param: &str| Error::Tool(format!("{name} requires '{param}'"));
    match name {
        TERMINAL_EXECUTE => Ok(CapabilityRequest::Terminal {
            command: arg_str(args, &["command", "cmd"])
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| missing("command"))?,
            workdir: arg_str(args, &["workdir", "cwd"]),
        }),
        SEND_REQUEST => {
            for param in ["method", "url"] {
                if arg_str(args, &[param]).is_none() {
                    return Err(missing(param));
                }
            }
            Ok(CapabilityRequest::Proxy {
                action: SEND_REQUEST.to_string(),
                args: Value::Object(args.clone()),
            })
        }
        LIST_REQUESTS => Ok(CapabilityRequest::Proxy {
            action: LIST_REQUESTS.to_string(),
            args: Value::Object(args.clone()),
        }),
        BROWSER_ACTION => Ok(CapabilityRequest::Browser {
            action: arg_str(args, &["action"]).ok_or_else(|| missing("action"))?,
            args: Value::Object(args.clone()),
        }),
        PYTHON_ACTION => Ok(CapabilityRequest::Python {
            code: arg_str(args, &["code"]).ok_or_else(|| missing("code"))?,
        }),
        STR_REPLACE_EDITOR => {
            let command = arg_str(args, &["command"]).ok_or_else(|| missing("command"))?;
            if !EDITOR_COMMANDS.contains(&command.as_str()) {
                return Err(Error::Tool(format!(
                    "unknown {name} command '{command}', expected one of: {}",
                    EDITOR_COMMANDS.join(", ")
                )));
            }
            if arg_str(args, &["path"]).map_or(true, |p| p.trim().is_empty()) {
                return Err(missing("path"));
            }
            let required: &[&str] = match command.as_str() {
                "create" => &["file_text"],
                "str_replace" => &["old_str"],
                "insert" => &["new_str", "insert_line"],
                _ => &[],
            };
            if let Some(param) = required
                .iter()
                .find(|param| args.get(**param).map_or(true, Value::is_null))
            {
                return Err(missing(*param));
            }
            Ok(CapabilityRequest::Files {
                action: command,
                args: Value::Object(args.clone()),
            })
        }
        LIST_FILES => Ok(CapabilityRequest::Files {
            action: LIST_FILES.to_string(),
            args: Value::Object(with_default_path(args)),
        }),
        SEARCH_FILES => {
            let pattern = arg_str(args, &["regex", "pattern"])
                .filter(|p| !p.is_empty())
                .ok_or_else(|| missing("regex"))?;
            regex::Regex::new(&pattern)
                .map_err(|e| Error::Tool(format!("{name}: invalid regex: {e}")))?;
            let mut args = with_default_path(args);
            args.insert("regex".to_string(), Value::String(pattern));
            Ok(CapabilityRequest::Files {
                action: SEARCH_FILES.to_string(),
                args: Value::Object(args),
            })
        }
        other => Err(Error::Tool(format!("'{other}' is not a sandbox tool"))),
    }
}

/// File tool arguments with `path` defaulting to the workspace root
fn with_default_path(args: &Map<String, Value>) -> Map<String, Value> {
    let mut args = args.clone();
    if arg_str(&args, &["path"]).map_or(true, |p| p.trim().is_empty()) {
        args.insert(
            "path".to_string(),
            Value::String(DEFAULT_WORKSPACE.to_string()),
        );
    }
    args
}

fn capability_result(request: &CapabilityRequest, output: CapabilityOutput) -> ToolResult {
    let artifacts = output.artifacts.clone();
    let result = match (&output.payload, request) {
        (
            Some(payload),
            CapabilityRequest::Proxy { .. }
            | CapabilityRequest::Browser { .. }
            | CapabilityRequest::Files { .. },
        ) => {
            let success = output.success()
                && payload.get("error").map_or(true, |e| e.is_null());
            if success {
                ToolResult::ok(payload.clone())
            } else {
                let message = payload
                    .get("error")
                    .and_then(|e| e.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("exit code {}", output.exit_code));
                ToolResult {
                    payload: payload.clone(),
                    ..ToolResult::failure(ToolErrorKind::Execution, message)
                }
            }
        }
        _ => {
            let text = truncate_output(&output.output(), MAX_OBSERVATION_BYTES);
            if output.success() {
                ToolResult::ok(text)
            } else {
                ToolResult {
                    payload: Value::String(text),
                    ..ToolResult::failure(
                        ToolErrorKind::Execution,
                        format!("exit code {}", output.exit_code),
                    )
                }
            }
        }
    };
    result.with_artifacts(artifacts)
}
