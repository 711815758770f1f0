//! Progress reporting from the core to whatever surface is watching the run

use crate::agents::{AgentId, AgentState, TerminationResult};
use crate::knowledge::Finding;
use crate::state::Metrics;

/// Event sink for UI updates. Implementations must not block.
pub trait EventSender: Send + Sync {
    /// Send a feed message
    fn send_feed(&self, agent: &str, message: &str, is_error: bool);

    /// Send an agent status change, with the tool currently running if any
    fn send_status(
        &self,
        agent_id: &AgentId,
        name: &str,
        parent: Option<&AgentId>,
        state: AgentState,
        current_tool: Option<&str>,
    );

    /// Send the model's prose for the latest decision
    fn send_thinking(&self, agent_id: &AgentId, content: &str);

    /// Send a newly created finding (merges are not reported)
    fn send_finding(&self, finding: &Finding);

    /// Send a terminated agent's result
    fn send_result(&self, result: &TerminationResult);

    /// Send metrics update
    fn send_metrics(&self, metrics: &Metrics);
}

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvents;

impl EventSender for NoopEvents {
    fn send_feed(&self, _agent: &str, _message: &str, _is_error: bool) {}

    fn send_status(
        &self,
        _agent_id: &AgentId,
        _name: &str,
        _parent: Option<&AgentId>,
        _state: AgentState,
        _current_tool: Option<&str>,
    ) {
    }

    fn send_thinking(&self, _agent_id: &AgentId, _content: &str) {}

    fn send_finding(&self, _finding: &Finding) {}

    fn send_result(&self, _result: &TerminationResult) {}

    fn send_metrics(&self, _metrics: &Metrics) {}
}
