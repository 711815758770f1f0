//! Channel between the core's event sink and whatever renders the run

use strix_core::agents::{AgentId, AgentState, TerminationResult};
use strix_core::events::EventSender;
use strix_core::knowledge::{Finding, Severity};
use strix_core::state::Metrics;
use tokio::sync::mpsc;

/// Events sent from the run to the UI
#[derive(Debug, Clone)]
pub enum UiEvent {
    /// Add entry to activity feed
    Feed {
        agent: String,
        message: String,
        is_error: bool,
    },

    /// Agent status change
    Status {
        agent_id: AgentId,
        name: String,
        parent: Option<AgentId>,
        state: AgentState,
        current_tool: Option<String>,
    },

    /// Latest model prose of an agent
    Thinking { agent_id: AgentId, content: String },

    /// A finding was created
    Finding {
        title: String,
        key: String,
        severity: Severity,
        discovered_by: AgentId,
    },

    /// An agent terminated
    Result(TerminationResult),

    Metrics(Metrics),

    /// The whole run is over
    Finished { success: bool, message: String },
}

/// `EventSender` that forwards everything over an unbounded channel
#[derive(Clone)]
pub struct ChannelEvents {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl ChannelEvents {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Send directly; a closed receiver is ignored
    pub fn send(&self, event: UiEvent) {
        let _ = self.tx.send(event);
    }
}

impl EventSender for ChannelEvents {
    fn send_feed(&self, agent: &str, message: &str, is_error: bool) {
        self.send(UiEvent::Feed {
            agent: agent.to_string(),
            message: message.to_string(),
            is_error,
        });
    }

    fn send_status(
        &self,
        agent_id: &AgentId,
        name: &str,
        parent: Option<&AgentId>,
        state: AgentState,
        current_tool: Option<&str>,
    ) {
        self.send(UiEvent::Status {
            agent_id: agent_id.clone(),
            name: name.to_string(),
            parent: parent.cloned(),
            state,
            current_tool: current_tool.map(str::to_string),
        });
    }

    fn send_thinking(&self, agent_id: &AgentId, content: &str) {
        self.send(UiEvent::Thinking {
            agent_id: agent_id.clone(),
            content: content.to_string(),
        });
    }

    fn send_finding(&self, finding: &Finding) {
        self.send(UiEvent::Finding {
            title: finding.title.clone(),
            key: finding.key.to_string(),
            severity: finding.severity,
            discovered_by: finding.discovered_by.clone(),
        });
    }

    fn send_result(&self, result: &TerminationResult) {
        self.send(UiEvent::Result(result.clone()));
    }

    fn send_metrics(&self, metrics: &Metrics) {
        self.send(UiEvent::Metrics(metrics.clone()));
    }
}
