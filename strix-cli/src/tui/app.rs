//! TUI Application state

use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use strix_core::agents::{AgentId, AgentState};
use strix_core::knowledge::Severity;
use strix_core::state::Metrics;
use tokio::sync::mpsc;

use super::channel::UiEvent;

/// Active view in the TUI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum View {
    #[default]
    Dashboard,
    Logs,
    Help,
}

/// One row of the agent tree
#[derive(Debug, Clone)]
pub struct AgentRow {
    pub id: AgentId,
    pub name: String,
    pub parent: Option<AgentId>,
    pub state: AgentState,
    pub current_tool: Option<String>,
    pub thinking: Option<String>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FindingRow {
    pub title: String,
    pub key: String,
    pub severity: Severity,
    pub discovered_by: AgentId,
}

/// Activity feed entry
#[derive(Debug, Clone)]
pub struct FeedEntry {
    pub timestamp: DateTime<Local>,
    pub agent: String,
    pub message: String,
    pub is_error: bool,
}

impl FeedEntry {
    pub fn new(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            agent: agent.into(),
            message: message.into(),
            is_error: false,
        }
    }

    pub fn error(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::new(agent, message)
        }
    }
}

/// Maximum number of feed entries to retain
const FEED_MAX_SIZE: usize = 500;

/// TUI Application state
pub struct App {
    pub view: View,
    /// Show quit confirmation dialog
    pub confirm_quit: bool,
    /// Cancellation was requested from the dashboard
    pub cancel_requested: bool,
    pub should_quit: bool,
    pub run_name: String,
    pub targets: Vec<String>,
    pub start_time: Instant,
    pub metrics: Metrics,
    /// Agents in the order they first appeared
    pub agents: Vec<AgentRow>,
    pub findings: Vec<FindingRow>,
    pub feed: Vec<FeedEntry>,
    pub log_scroll: usize,
    /// Final message once the run is over
    pub finished: Option<(bool, String)>,
    pub event_rx: Option<mpsc::UnboundedReceiver<UiEvent>>,
}

impl App {
    pub fn new(
        run_name: impl Into<String>,
        targets: Vec<String>,
        event_rx: Option<mpsc::UnboundedReceiver<UiEvent>>,
    ) -> Self {
        Self {
            view: View::Dashboard,
            confirm_quit: false,
            cancel_requested: false,
            should_quit: false,
            run_name: run_name.into(),
            targets,
            start_time: Instant::now(),
            metrics: Metrics::default(),
            agents: Vec::new(),
            findings: Vec::new(),
            feed: Vec::new(),
            log_scroll: 0,
            finished: None,
            event_rx,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Format elapsed time for display
    pub fn elapsed_display(&self) -> String {
        let secs = self.elapsed().as_secs();
        let mins = secs / 60;
        let hours = mins / 60;

        if hours > 0 {
            format!("{}h {:02}m {:02}s", hours, mins % 60, secs % 60)
        } else if mins > 0 {
            format!("{}m {:02}s", mins, secs % 60)
        } else {
            format!("{}s", secs)
        }
    }

    pub fn add_feed(&mut self, entry: FeedEntry) {
        self.feed.push(entry);
        if self.feed.len() > FEED_MAX_SIZE {
            self.feed.remove(0);
        }
    }

    fn agent_mut(&mut self, id: &AgentId) -> Option<&mut AgentRow> {
        self.agents.iter_mut().find(|a| &a.id == id)
    }

    fn agent_name(&self, id: &AgentId) -> String {
        self.agents
            .iter()
            .find(|a| &a.id == id)
            .map_or_else(|| id.to_string(), |a| a.name.clone())
    }

    /// Depth of an agent in the tree, for indentation
    pub fn depth_of(&self, row: &AgentRow) -> usize {
        let mut depth = 0;
        let mut parent = row.parent.clone();
        while let Some(id) = parent {
            depth += 1;
            parent = self
                .agents
                .iter()
                .find(|a| a.id == id)
                .and_then(|a| a.parent.clone());
            if depth > self.agents.len() {
                break;
            }
        }
        depth
    }

    /// Agents ordered as a tree: every child right after its parent
    pub fn tree_order(&self) -> Vec<&AgentRow> {
        let mut out = Vec::with_capacity(self.agents.len());
        let mut stack: Vec<&AgentRow> = self
            .agents
            .iter()
            .filter(|a| {
                a.parent
                    .as_ref()
                    .map_or(true, |p| !self.agents.iter().any(|x| &x.id == p))
            })
            .rev()
            .collect();
        while let Some(row) = stack.pop() {
            out.push(row);
            stack.extend(
                self.agents
                    .iter()
                    .filter(|a| a.parent.as_ref() == Some(&row.id))
                    .rev(),
            );
        }
        out
    }

    pub fn count_findings(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    pub fn active_agents(&self) -> usize {
        self.agents.iter().filter(|a| !a.state.is_terminal()).count()
    }

    /// Fold one run event into the view state
    pub fn apply(&mut self, event: UiEvent) {
        match event {
            UiEvent::Feed {
                agent,
                message,
                is_error,
            } => {
                if is_error {
                    self.add_feed(FeedEntry::error(agent, message));
                } else {
                    self.add_feed(FeedEntry::new(agent, message));
                }
            }
            UiEvent::Status {
                agent_id,
                name,
                parent,
                state,
                current_tool,
            } => match self.agent_mut(&agent_id) {
                Some(row) => {
                    row.state = state;
                    row.current_tool = current_tool;
                }
                None => self.agents.push(AgentRow {
                    id: agent_id,
                    name,
                    parent,
                    state,
                    current_tool,
                    thinking: None,
                    summary: None,
                }),
            },
            UiEvent::Thinking { agent_id, content } => {
                if let Some(row) = self.agent_mut(&agent_id) {
                    row.thinking = Some(content);
                }
            }
            UiEvent::Finding {
                title,
                key,
                severity,
                discovered_by,
            } => {
                let agent = self.agent_name(&discovered_by);
                self.add_feed(FeedEntry::new(agent, format!("[{severity}] {title}")));
                self.findings.push(FindingRow {
                    title,
                    key,
                    severity,
                    discovered_by,
                });
                self.findings.sort_by(|a, b| b.severity.cmp(&a.severity));
            }
            UiEvent::Result(result) => {
                let message = format!("{} ({})", result.state, result.reason);
                if let Some(row) = self.agent_mut(&result.agent_id) {
                    row.state = result.state;
                    row.current_tool = None;
                    row.summary = Some(result.summary.clone());
                }
                let entry = if result.succeeded() {
                    FeedEntry::new(result.name, message)
                } else {
                    FeedEntry::error(result.name, message)
                };
                self.add_feed(entry);
            }
            UiEvent::Metrics(metrics) => {
                self.metrics = metrics;
            }
            UiEvent::Finished { success, message } => {
                if success {
                    self.add_feed(FeedEntry::new("system", &message));
                } else {
                    self.add_feed(FeedEntry::error("system", &message));
                }
                self.finished = Some((success, message));
            }
        }
    }

    /// Apply every event waiting on the channel
    pub fn drain_events(&mut self) {
        let mut events = Vec::new();
        if let Some(ref mut rx) = self.event_rx {
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
        }
        for event in events {
            self.apply(event);
        }
    }

    pub fn scroll_up(&mut self) {
        self.log_scroll = self.log_scroll.saturating_add(1);
    }

    pub fn scroll_down(&mut self) {
        self.log_scroll = self.log_scroll.saturating_sub(1);
    }
}
