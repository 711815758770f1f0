//! Agent identity, lifecycle state and the seam between an agent and its graph

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::SpawnRequest;
use crate::Result;

/// Unique agent identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Generate a fresh id of the form `agent_1a2b3c4d`
    pub fn generate() -> Self {
        let hex: String = uuid::Uuid::new_v4().simple().to_string().chars().take(8).collect();
        Self(format!("agent_{hex}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AgentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Agent lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Admitted, waiting for a concurrency slot
    #[default]
    Pending,
    /// Driving its reasoning loop
    Running,
    /// Suspended until every child is terminal
    WaitingOnChildren,
    Succeeded,
    Failed,
    Cancelled,
}

impl AgentState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AgentState::Succeeded | AgentState::Failed | AgentState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentState::Pending => "pending",
            AgentState::Running => "running",
            AgentState::WaitingOnChildren => "waiting_on_children",
            AgentState::Succeeded => "succeeded",
            AgentState::Failed => "failed",
            AgentState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an agent stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminationReason {
    /// The agent declared success
    Completed,
    /// The agent declared it could not achieve its objective
    DeclaredFailure,
    BudgetExhausted,
    Timeout,
    ReasoningFailure { consecutive: u32 },
    Cancelled,
    SandboxFailure { message: String },
    /// The run was aborted by an infrastructure failure
    Aborted { message: String },
    /// The agent's task panicked
    Crashed { message: String },
}

impl TerminationReason {
    /// Terminal state a reason maps to
    pub fn state(&self) -> AgentState {
        match self {
            TerminationReason::Completed => AgentState::Succeeded,
            TerminationReason::Cancelled => AgentState::Cancelled,
            _ => AgentState::Failed,
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Completed => write!(f, "completed"),
            TerminationReason::DeclaredFailure => write!(f, "declared failure"),
            TerminationReason::BudgetExhausted => write!(f, "step budget exhausted"),
            TerminationReason::Timeout => write!(f, "deadline expired"),
            TerminationReason::ReasoningFailure { consecutive } => {
                write!(f, "{consecutive} consecutive reasoning failures")
            }
            TerminationReason::Cancelled => write!(f, "cancelled"),
            TerminationReason::SandboxFailure { message } => write!(f, "sandbox failure: {message}"),
            TerminationReason::Aborted { message } => write!(f, "run aborted: {message}"),
            TerminationReason::Crashed { message } => write!(f, "agent task crashed: {message}"),
        }
    }
}

/// Final state of an agent plus why, handed to its parent and the aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminationResult {
    pub agent_id: AgentId,
    pub name: String,
    pub state: AgentState,
    pub reason: TerminationReason,
    pub summary: String,
    pub steps_used: u32,
    pub finished_at: DateTime<Utc>,
}

impl TerminationResult {
    pub fn new(
        agent_id: AgentId,
        name: impl Into<String>,
        reason: TerminationReason,
        summary: impl Into<String>,
        steps_used: u32,
    ) -> Self {
        Self {
            agent_id,
            name: name.into(),
            state: reason.state(),
            reason,
            summary: summary.into(),
            steps_used,
            finished_at: Utc::now(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == AgentState::Succeeded
    }
}

/// Step count and wall-clock deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    pub max_steps: u32,
    pub deadline: Instant,
}

/// Latest deadline a budget can carry, about thirty years out
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

impl Budget {
    pub fn new(max_steps: u32, timeout: Duration) -> Self {
        Self {
            max_steps,
            deadline: deadline_after(timeout.min(FAR_FUTURE)),
        }
    }

    /// Budget for a child: its own step count, and a deadline never later than the parent's
    pub fn for_child(&self, max_steps: u32, timeout: Option<Duration>) -> Self {
        let deadline = match timeout {
            Some(t) => self.deadline.min(deadline_after(t)),
            None => self.deadline,
        };
        Self {
            max_steps,
            deadline,
        }
    }

    pub fn remaining_time(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// `now + timeout`, saturating instead of overflowing the clock
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// What an agent may ask of the orchestration graph it lives in
#[async_trait]
pub trait GraphControl: Send + Sync {
    /// Admit a child of `parent` (or a root when `None`)
    async fn admit(&self, parent: Option<&AgentId>, request: SpawnRequest) -> Result<AgentId>;

    /// Whether the agent has children that are not yet terminal
    async fn has_live_children(&self, parent: &AgentId) -> bool;

    /// Move `parent` to WaitingOnChildren, block until every child is terminal,
    /// and return their results once all are in
    async fn wait_for_children(&self, parent: &AgentId) -> Result<Vec<TerminationResult>>;

    /// Cancel every descendant of `id` (not `id` itself); returns how many were cancelled
    async fn cancel_descendants(&self, id: &AgentId) -> usize;

    /// Record a collaboration edge between two agents
    async fn link_collaborators(&self, from: &AgentId, to: &AgentId) -> Result<()>;

    /// Human-readable view of the graph from `viewer`'s perspective
    async fn render_graph(&self, viewer: &AgentId) -> String;
}
