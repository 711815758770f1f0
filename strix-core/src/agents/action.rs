//! The one decision an agent takes per reasoning turn

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::knowledge::Severity;
use crate::providers::{parse_tool_invocations, truncate_to_first_function, CompletionResponse};
use crate::{Error, Result};

/// Tool names the agent loop handles itself rather than routing as plain tool calls
pub const SPAWN_TOOL: &str = "create_agent";
pub const REPORT_TOOL: &str = "create_vulnerability_report";
pub const WAIT_TOOLS: &[&str] = &["wait_for_children", "wait_for_message"];
pub const FINISH_TOOLS: &[&str] = &["agent_finish", "finish_scan"];

/// Request to admit a child agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub name: String,
    pub objective: String,
    pub max_steps: Option<u32>,
    #[serde(with = "opt_secs", default)]
    pub timeout: Option<Duration>,
    /// Extra context handed to the child with its objective
    pub context: Option<String>,
}

impl SpawnRequest {
    pub fn new(name: impl Into<String>, objective: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objective: objective.into(),
            max_steps: None,
            timeout: None,
            context: None,
        }
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Parse `create_agent` arguments
    pub fn from_args(args: &Map<String, Value>) -> Result<Self> {
        let objective = arg_str(args, &["task", "objective", "instructions"])
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| Error::Tool("create_agent requires a non-empty 'task'".to_string()))?;
        let name = arg_str(args, &["name"])
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "agent".to_string());

        let max_steps = match arg_str(args, &["max_steps"]) {
            Some(raw) => Some(raw.trim().parse::<u32>().map_err(|_| {
                Error::Tool(format!("create_agent: 'max_steps' must be a positive integer, got '{raw}'"))
            })?),
            None => None,
        };
        if max_steps == Some(0) {
            return Err(Error::Tool(
                "create_agent: 'max_steps' must be at least 1".to_string(),
            ));
        }

        let timeout = match arg_str(args, &["timeout", "timeout_secs"]) {
            Some(raw) => Some(Duration::from_secs(raw.trim().parse::<u64>().map_err(|_| {
                Error::Tool(format!("create_agent: 'timeout' must be seconds, got '{raw}'"))
            })?)),
            None => None,
        };

        Ok(Self {
            name,
            objective,
            max_steps,
            timeout,
            context: arg_str(args, &["context"]),
        })
    }
}

/// A finding as submitted by an agent, before canonicalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingReport {
    pub class: String,
    pub asset: String,
    pub title: String,
    pub severity: Severity,
    pub evidence: String,
}

impl FindingReport {
    /// Parse `create_vulnerability_report` arguments
    pub fn from_args(args: &Map<String, Value>) -> Result<Self> {
        let required = |keys: &[&str]| {
            arg_str(args, keys)
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| {
                    Error::Tool(format!(
                        "create_vulnerability_report requires '{}'",
                        keys.first().copied().unwrap_or_default()
                    ))
                })
        };

        let title = required(&["title"])?;
        let class = required(&["class", "vulnerability_class", "vulnerability_type"])?;
        let asset = required(&["asset", "endpoint", "target"])?;
        let evidence = required(&["evidence", "content", "poc"])?;
        let severity = required(&["severity"])?
            .parse::<Severity>()
            .map_err(|e| Error::Tool(format!("create_vulnerability_report: {e}")))?;

        Ok(Self {
            class,
            asset,
            title,
            severity,
            evidence,
        })
    }
}

/// Decoded reasoning output
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ToolCall {
        name: String,
        args: Map<String, Value>,
    },
    SpawnAgent(SpawnRequest),
    ReportFinding(FindingReport),
    /// Suspend until every child is terminal
    WaitForChildren,
    Finish {
        success: bool,
        summary: String,
    },
}

impl Action {
    /// Map a named invocation onto an action.
    ///
    /// Spawn and report invocations with bad arguments stay plain tool calls, so
    /// the gateway answers them with a tool error the agent can correct.
    pub fn from_invocation(name: &str, args: Map<String, Value>) -> Self {
        match name {
            SPAWN_TOOL => match SpawnRequest::from_args(&args) {
                Ok(request) => Action::SpawnAgent(request),
                Err(_) => Action::ToolCall {
                    name: name.to_string(),
                    args,
                },
            },
            REPORT_TOOL => match FindingReport::from_args(&args) {
                Ok(report) => Action::ReportFinding(report),
                Err(_) => Action::ToolCall {
                    name: name.to_string(),
                    args,
                },
            },
            n if WAIT_TOOLS.contains(&n) => Action::WaitForChildren,
            n if FINISH_TOOLS.contains(&n) => Action::Finish {
                success: arg_bool(&args, "success").unwrap_or(true),
                summary: arg_str(&args, &["result_summary", "summary", "content"])
                    .unwrap_or_default(),
            },
            _ => Action::ToolCall {
                name: name.to_string(),
                args,
            },
        }
    }

    /// Decode a completion: structured tool calls first, then the text format
    pub fn decode(response: &CompletionResponse) -> Result<Self> {
        if let Some(call) = response.tool_calls.first() {
            let args = match serde_json::from_str::<Value>(&call.arguments) {
                Ok(Value::Object(map)) => map,
                Ok(Value::Null) => Map::new(),
                Ok(other) => {
                    return Err(Error::MalformedAction(format!(
                        "arguments of '{}' must be an object, got {other}",
                        call.name
                    )))
                }
                Err(e) => {
                    return Err(Error::MalformedAction(format!(
                        "arguments of '{}' are not valid JSON: {e}",
                        call.name
                    )))
                }
            };
            return Ok(Self::from_invocation(&call.name, args));
        }

        let content = response.content.as_deref().unwrap_or_default();
        let first = truncate_to_first_function(content);
        match parse_tool_invocations(first).into_iter().next() {
            Some(invocation) if !invocation.name.is_empty() => {
                Ok(Self::from_invocation(&invocation.name, invocation.args))
            }
            _ => Err(Error::MalformedAction(
                "response contained no tool invocation".to_string(),
            )),
        }
    }

    /// Tool name as it appears in the audit log
    pub fn tool_name(&self) -> &str {
        match self {
            Action::ToolCall { name, .. } => name,
            Action::SpawnAgent(_) => SPAWN_TOOL,
            Action::ReportFinding(_) => REPORT_TOOL,
            Action::WaitForChildren => "wait_for_children",
            Action::Finish { .. } => "agent_finish",
        }
    }

    /// Whether executing this action consumes a step
    pub fn counts_as_step(&self) -> bool {
        !matches!(self, Action::Finish { .. } | Action::WaitForChildren)
    }
}

/// First present key rendered as a string; numbers and booleans are stringified
pub fn arg_str(args: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match args.get(*key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    })
}

pub fn arg_bool(args: &Map<String, Value>, key: &str) -> Option<bool> {
    match args.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::providers::ToolCall;

    fn text(content: &str) -> CompletionResponse {
        CompletionResponse::text(content)
    }

    #[test]
    fn test_decode_text_tool_call() {
        let action = Action::decode(&text(
            "Let me look.\n<function=terminal_execute>\n<parameter=command>ls -la</parameter>\n</function>",
        ))
        .unwrap();
        match action {
            Action::ToolCall { name, args } => {
                assert_eq!(name, "terminal_execute");
                assert_eq!(args["command"], "ls -la");
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_only_first_invocation_honored() {
        let action = Action::decode(&text(
            "<function=add_note><parameter=tag>recon</parameter><parameter=text>a</parameter></function>\n<function=agent_finish></function>",
        ))
        .unwrap();
        assert!(matches!(action, Action::ToolCall { ref name, .. } if name == "add_note"));
    }

    #[test]
    fn test_unclosed_invocation_repaired() {
        let action = Action::decode(&text(
            "<function=agent_finish>\n<parameter=result_summary>done</parameter>\n<parameter=success>false</parameter>",
        ))
        .unwrap();
        assert_eq!(
            action,
            Action::Finish {
                success: false,
                summary: "done".to_string()
            }
        );
    }

    #[test]
    fn test_structured_tool_calls_preferred() {
        let response = CompletionResponse {
            content: Some("<function=agent_finish></function>".to_string()),
            tool_calls: vec![ToolCall {
                id: "call_1".to_string(),
                name: "create_agent".to_string(),
                arguments: r#"{"task": "map /api", "name": "api-recon", "max_steps": 20}"#
                    .to_string(),
            }],
            ..CompletionResponse::text("")
        };
        match Action::decode(&response).unwrap() {
            Action::SpawnAgent(request) => {
                assert_eq!(request.name, "api-recon");
                assert_eq!(request.objective, "map /api");
                assert_eq!(request.max_steps, Some(20));
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_no_invocation_is_malformed() {
        let err = Action::decode(&text("I think I am done here.")).unwrap_err();
        assert!(matches!(err, Error::MalformedAction(_)));
    }

    #[test]
    fn test_report_decoded_with_severity() {
        let action = Action::decode(&text(
            "<function=create_vulnerability_report>\
             <parameter=title>SQL injection in login</parameter>\
             <parameter=class>SQL Injection</parameter>\
             <parameter=asset>https://shop.test/login</parameter>\
             <parameter=severity>High</parameter>\
             <parameter=evidence>' OR 1=1 -- returns admin session</parameter>\
             </function>",
        ))
        .unwrap();
        match action {
            Action::ReportFinding(report) => {
                assert_eq!(report.severity, Severity::High);
                assert_eq!(report.evidence, "' OR 1=1 -- returns admin session");
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_spawn_stays_tool_call() {
        let action = Action::decode(&text(
            "<function=create_agent><parameter=name>x</parameter></function>",
        ))
        .unwrap();
        assert!(matches!(action, Action::ToolCall { ref name, .. } if name == SPAWN_TOOL));

        let mut args = Map::new();
        args.insert("task".to_string(), Value::String("t".to_string()));
        args.insert("max_steps".to_string(), Value::String("lots".to_string()));
        assert!(SpawnRequest::from_args(&args).is_err());
    }

    #[test]
    fn test_wait_aliases() {
        for name in WAIT_TOOLS {
            let body = format!("<function={name}></function>");
            assert_eq!(Action::decode(&text(&body)).unwrap(), Action::WaitForChildren);
        }
    }

    #[test]
    fn test_steps_counted_for_tool_actions_only() {
        assert!(Action::SpawnAgent(SpawnRequest::new("a", "b")).counts_as_step());
        assert!(!Action::WaitForChildren.counts_as_step());
        assert!(!Action::Finish {
            success: true,
            summary: String::new()
        }
        .counts_as_step());
    }
}
