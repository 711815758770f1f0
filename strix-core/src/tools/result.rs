//! Uniform tool call result

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Error;

/// Maximum observation size handed back to the agent
pub const MAX_OBSERVATION_BYTES: usize = 16 * 1024;

/// Why a tool call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    UnknownTool,
    InvalidArguments,
    Execution,
    Timeout,
    /// Admission or sandbox capacity reached
    Capacity,
    /// The agent or its environment is being torn down
    Cancelled,
    Sandbox,
}

impl ToolErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolErrorKind::UnknownTool => "unknown_tool",
            ToolErrorKind::InvalidArguments => "invalid_arguments",
            ToolErrorKind::Execution => "execution",
            ToolErrorKind::Timeout => "timeout",
            ToolErrorKind::Capacity => "capacity",
            ToolErrorKind::Cancelled => "cancelled",
            ToolErrorKind::Sandbox => "sandbox",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: ToolErrorKind,
    pub message: String,
}

/// `{success, payload | error, artifacts}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub payload: Value,
    pub error: Option<ToolFailure>,
    pub artifacts: Vec<String>,
}

impl ToolResult {
    pub fn ok(payload: impl Into<Value>) -> Self {
        Self {
            success: true,
            payload: payload.into(),
            error: None,
            artifacts: vec![],
        }
    }

    pub fn failure(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: Value::Null,
            error: Some(ToolFailure {
                kind,
                message: message.into(),
            }),
            artifacts: vec![],
        }
    }

    pub fn with_artifacts(mut self, artifacts: Vec<String>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Text appended to the agent's conversation
    pub fn observation(&self) -> String {
        let mut text = match (&self.error, &self.payload) {
            (Some(failure), Value::Null) => format!("Error ({}): {}", failure.kind.as_str(), failure.message),
            (Some(failure), payload) => format!(
                "Error ({}): {}\n{}",
                failure.kind.as_str(),
                failure.message,
                render_payload(payload)
            ),
            (None, payload) => render_payload(payload),
        };
        if !self.artifacts.is_empty() {
            text.push_str(&format!("\nArtifacts: {}", self.artifacts.join(", ")));
        }
        truncate_output(&text, MAX_OBSERVATION_BYTES)
    }
}

impl From<Error> for ToolResult {
    /// Scheduler and store errors surface to the agent as tool errors
    fn from(error: Error) -> Self {
        let kind = match &error {
            Error::Timeout(_) => ToolErrorKind::Timeout,
            Error::CapacityExceeded(_) | Error::ResourceExhausted(_) => ToolErrorKind::Capacity,
            Error::Cancelled(_) => ToolErrorKind::Cancelled,
            Error::Tool(_) | Error::AgentNotFound(_) | Error::Serde(_) => {
                ToolErrorKind::InvalidArguments
            }
            Error::Docker(_)
            | Error::Provision(_)
            | Error::Teardown(_)
            | Error::EnvironmentNotFound(_) => ToolErrorKind::Sandbox,
            _ => ToolErrorKind::Execution,
        };
        let message = match error {
            Error::Tool(message) => message,
            other => other.to_string(),
        };
        Self::failure(kind, message)
    }
}

fn render_payload(payload: &Value) -> String {
    match payload {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Keep the head of `text` within `max_bytes`, cutting on a char boundary
pub fn truncate_output(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}\n[output truncated: {} of {} bytes shown]",
        &text[..cut],
        cut,
        text.len()
    )
}
