//! System prompts for root and child agents

use std::path::Path;

use serde::Deserialize;

use crate::providers::ToolDefinition;
use crate::{Error, Result};

/// Agent prompt configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentPrompt {
    pub prompt: String,
}

/// All agent prompts
#[derive(Debug, Clone, Deserialize)]
pub struct Prompts {
    pub root: AgentPrompt,
    pub child: AgentPrompt,
    pub tool_format: AgentPrompt,
}

impl Prompts {
    /// Load prompts from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse prompts from TOML string
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse prompts: {}", e)))
    }

    /// Load from default location (embedded)
    #[allow(clippy::expect_used)]
    pub fn default_prompts() -> Self {
        let content = include_str!("../../prompts.toml");
        Self::parse(content).expect("Embedded prompts.toml should be valid")
    }

    /// Full system prompt for an agent
    pub fn system_prompt(
        &self,
        is_root: bool,
        name: &str,
        agent_id: &str,
        max_steps: u32,
        tools: &[ToolDefinition],
    ) -> String {
        let role = if is_root { &self.root } else { &self.child };
        let body = role
            .prompt
            .replace("{name}", name)
            .replace("{agent_id}", agent_id)
            .replace("{max_steps}", &max_steps.to_string());
        let format = self
            .tool_format
            .prompt
            .replace("{tools}", &render_tools(tools));
        format!("{}\n{}", body.trim_end(), format.trim_end())
    }
}

impl Default for Prompts {
    fn default() -> Self {
        Self::default_prompts()
    }
}

/// One block per tool: name, description and parameters with their descriptions
pub fn render_tools(tools: &[ToolDefinition]) -> String {
    tools
        .iter()
        .map(|tool| {
            let mut block = format!("- {}: {}", tool.name, tool.description);
            let required: Vec<&str> = tool
                .parameters
                .get("required")
                .and_then(|r| r.as_array())
                .map(|r| r.iter().filter_map(|v| v.as_str()).collect())
                .unwrap_or_default();

            if let Some(props) = tool.parameters.get("properties").and_then(|p| p.as_object()) {
                for (param, schema) in props {
                    let description = schema
                        .get("description")
                        .and_then(|d| d.as_str())
                        .unwrap_or_default();
                    let marker = if required.contains(&param.as_str()) {
                        " (required)"
                    } else {
                        ""
                    };
                    block.push_str(&format!("\n    {param}{marker}: {description}"));
                }
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n")
}
