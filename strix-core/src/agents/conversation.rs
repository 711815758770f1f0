//! Append-only conversation history of one agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AgentId;
use crate::providers::{Message, ToolDefinition};

/// Messages kept verbatim at the tail of the transcript sent to the model
pub const HISTORY_WINDOW: usize = 120;

/// One entry in an agent's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Turn {
    /// The objective and any instructions the agent started with
    Task { content: String },
    /// Raw model output for one reasoning call
    Reasoning { content: String },
    /// Result of executing the chosen action
    Observation {
        tool: String,
        success: bool,
        content: String,
    },
    /// A message from another agent, or a system notice
    Notification { from: String, content: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    turn: Turn,
    at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    entries: Vec<Entry>,
}

impl Conversation {
    pub fn new(task: impl Into<String>) -> Self {
        let mut conversation = Self::default();
        conversation.push(Turn::Task {
            content: task.into(),
        });
        conversation
    }

    pub fn push(&mut self, turn: Turn) {
        self.entries.push(Entry {
            turn,
            at: Utc::now(),
        });
    }

    pub fn reasoning(&mut self, content: impl Into<String>) {
        self.push(Turn::Reasoning {
            content: content.into(),
        });
    }

    pub fn observation(&mut self, tool: impl Into<String>, success: bool, content: impl Into<String>) {
        self.push(Turn::Observation {
            tool: tool.into(),
            success,
            content: content.into(),
        });
    }

    pub fn notify(&mut self, from: impl Into<String>, content: impl Into<String>) {
        self.push(Turn::Notification {
            from: from.into(),
            content: content.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.entries.iter().map(|e| &e.turn)
    }

    pub fn last(&self) -> Option<&Turn> {
        self.entries.last().map(|e| &e.turn)
    }

    /// Provider messages: the task plus a recent window of history
    pub fn to_messages(&self) -> Vec<Message> {
        let mut messages = Vec::new();
        let mut turns = self.turns();

        if let Some(first) = turns.next() {
            messages.push(render(first));
        }

        let rest: Vec<&Turn> = turns.collect();
        let skipped = rest.len().saturating_sub(HISTORY_WINDOW);
        if skipped > 0 {
            messages.push(Message::user(format!(
                "[{skipped} earlier messages omitted; use query_notes to recall recorded context]"
            )));
        }
        messages.extend(rest.into_iter().skip(skipped).map(render));
        messages
    }
}

fn render(turn: &Turn) -> Message {
    match turn {
        Turn::Task { content } => Message::user(content.clone()),
        Turn::Reasoning { content } => Message::assistant(content.clone()),
        Turn::Observation {
            tool,
            success,
            content,
        } => {
            let status = if *success { "success" } else { "error" };
            Message::user(format!(
                "<tool_result tool=\"{tool}\" status=\"{status}\">\n{content}\n</tool_result>"
            ))
        }
        Turn::Notification { from, content } => Message::user(format!(
            "<inter_agent_message from=\"{from}\">\n{content}\n</inter_agent_message>"
        )),
    }
}

/// Everything one reasoning call sees
#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub agent_id: AgentId,
    pub agent_name: String,
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub steps_remaining: u32,
}
