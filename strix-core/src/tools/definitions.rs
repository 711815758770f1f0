//! Tool catalogue and JSON-schema definitions

use serde_json::json;

use crate::providers::ToolDefinition;

pub const TERMINAL_EXECUTE: &str = "terminal_execute";
pub const SEND_REQUEST: &str = "send_request";
pub const LIST_REQUESTS: &str = "list_requests";
pub const BROWSER_ACTION: &str = "browser_action";
pub const PYTHON_ACTION: &str = "python_action";
pub const STR_REPLACE_EDITOR: &str = "str_replace_editor";
pub const LIST_FILES: &str = "list_files";
pub const SEARCH_FILES: &str = "search_files";
pub const ADD_NOTE: &str = "add_note";
pub const QUERY_NOTES: &str = "query_notes";
pub const SEND_MESSAGE: &str = "send_message_to_agent";
pub const VIEW_AGENT_GRAPH: &str = "view_agent_graph";
pub const CREATE_AGENT: &str = "create_agent";
pub const CREATE_REPORT: &str = "create_vulnerability_report";
pub const WAIT_FOR_CHILDREN: &str = "wait_for_children";
pub const AGENT_FINISH: &str = "agent_finish";
pub const FINISH_SCAN: &str = "finish_scan";

/// Tools that run inside the caller's sandbox environment
pub const SANDBOX_TOOLS: &[&str] = &[
    TERMINAL_EXECUTE,
    SEND_REQUEST,
    LIST_REQUESTS,
    BROWSER_ACTION,
    PYTHON_ACTION,
    STR_REPLACE_EDITOR,
    LIST_FILES,
    SEARCH_FILES,
];

/// Sub-commands of `str_replace_editor`
pub const EDITOR_COMMANDS: &[&str] = &["view", "create", "str_replace", "insert", "undo_edit"];

/// Where file tools look when no path is given
pub const DEFAULT_WORKSPACE: &str = "/workspace";

pub fn requires_sandbox(name: &str) -> bool {
    SANDBOX_TOOLS.contains(&name)
}

fn tool(name: &str, description: &str, parameters: serde_json::Value) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        parameters,
    }
}

/// Every tool an agent may call. The root finishes the whole scan; children finish their task.
pub fn tool_definitions(is_root: bool) -> Vec<ToolDefinition> {
    let mut tools = vec![
        tool(
            TERMINAL_EXECUTE,
            "Run a shell command in your sandbox. Output is truncated to 16 KiB.",
            json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Shell command line"},
                    "workdir": {"type": "string", "description": "Working directory (default /workspace)"}
                },
                "required": ["command"]
            }),
        ),
        tool(
            SEND_REQUEST,
            "Send an HTTP request through the sandbox proxy; the exchange is recorded.",
            json!({
                "type": "object",
                "properties": {
                    "method": {"type": "string", "description": "HTTP method"},
                    "url": {"type": "string", "description": "Absolute URL"},
                    "headers": {"type": "object", "description": "Header map"},
                    "body": {"type": "string", "description": "Request body"}
                },
                "required": ["method", "url"]
            }),
        ),
        tool(
            LIST_REQUESTS,
            "List HTTP exchanges captured by the sandbox proxy.",
            json!({
                "type": "object",
                "properties": {
                    "filter": {"type": "string", "description": "Substring to match against URL or host"},
                    "limit": {"type": "integer", "description": "Maximum entries (default 50)"}
                }
            }),
        ),
        tool(
            BROWSER_ACTION,
            "Drive the sandbox browser: goto, click, type, execute_js, screenshot, close.",
            json!({
                "type": "object",
                "properties": {
                    "action": {"type": "string", "description": "Browser action name"},
                    "url": {"type": "string", "description": "Target URL for goto"},
                    "selector": {"type": "string", "description": "CSS selector for click/type"},
                    "text": {"type": "string", "description": "Text for type"},
                    "js_code": {"type": "string", "description": "Script for execute_js"}
                },
                "required": ["action"]
            }),
        ),
        tool(
            PYTHON_ACTION,
            "Execute Python 3 code in your sandbox.",
            json!({
                "type": "object",
                "properties": {
                    "code": {"type": "string", "description": "Python source"}
                },
                "required": ["code"]
            }),
        ),
        tool(
            STR_REPLACE_EDITOR,
            "View, create and edit files in your sandbox, e.g. cloned or mounted source. \
             str_replace needs an old_str that occurs exactly once; undo_edit reverts the last edit of a file.",
            json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "enum": EDITOR_COMMANDS, "description": "Editor command"},
                    "path": {"type": "string", "description": "Absolute file or directory path"},
                    "file_text": {"type": "string", "description": "Content for create"},
                    "old_str": {"type": "string", "description": "Exact text to replace"},
                    "new_str": {"type": "string", "description": "Replacement for str_replace, text for insert"},
                    "insert_line": {"type": "integer", "description": "Insert after this line (0 = top)"},
                    "view_range": {"type": "array", "items": {"type": "integer"}, "description": "[start, end] lines for view"}
                },
                "required": ["command", "path"]
            }),
        ),
        tool(
            LIST_FILES,
            "List files and directories under a path in your sandbox.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Directory (default /workspace)"},
                    "recursive": {"type": "boolean", "description": "Descend into subdirectories"}
                }
            }),
        ),
        tool(
            SEARCH_FILES,
            "Search file contents under a path with a regular expression.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Directory (default /workspace)"},
                    "regex": {"type": "string", "description": "Pattern to search for"},
                    "file_pattern": {"type": "string", "description": "Glob limiting which files are searched, e.g. *.py"}
                },
                "required": ["regex"]
            }),
        ),
        tool(
            ADD_NOTE,
            "File a note under a tag in the shared knowledge store, visible to every agent.",
            json!({
                "type": "object",
                "properties": {
                    "tag": {"type": "string", "description": "Topic, e.g. endpoints, credentials, tech"},
                    "text": {"type": "string", "description": "Note body"}
                },
                "required": ["tag", "text"]
            }),
        ),
        tool(
            QUERY_NOTES,
            "Read every note filed under a tag, oldest first. Omit the tag to list tags.",
            json!({
                "type": "object",
                "properties": {
                    "tag": {"type": "string", "description": "Topic to read"}
                }
            }),
        ),
        tool(
            SEND_MESSAGE,
            "Send a message to another agent by id. It is delivered before their next decision.",
            json!({
                "type": "object",
                "properties": {
                    "target_agent_id": {"type": "string", "description": "Recipient agent id"},
                    "message": {"type": "string", "description": "Message text"}
                },
                "required": ["target_agent_id", "message"]
            }),
        ),
        tool(
            VIEW_AGENT_GRAPH,
            "Show every agent in the run with its state, parent and collaborators.",
            json!({"type": "object", "properties": {}}),
        ),
        tool(
            CREATE_AGENT,
            "Spawn a child agent with its own sandbox to work on a focused task.",
            json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Short role name"},
                    "task": {"type": "string", "description": "Objective for the child"},
                    "context": {"type": "string", "description": "Background the child needs"},
                    "max_steps": {"type": "integer", "description": "Tool-call budget"},
                    "timeout": {"type": "integer", "description": "Wall-clock limit in seconds"}
                },
                "required": ["name", "task"]
            }),
        ),
        tool(
            CREATE_REPORT,
            "Report a validated vulnerability. Reports of the same class on the same asset are merged.",
            json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string", "description": "One-line summary"},
                    "class": {"type": "string", "description": "Vulnerability class, e.g. sqli, xss, ssrf"},
                    "asset": {"type": "string", "description": "Affected URL, endpoint or file"},
                    "severity": {"type": "string", "description": "critical, high, medium, low or info"},
                    "evidence": {"type": "string", "description": "Proof of concept and observed result"}
                },
                "required": ["title", "class", "asset", "severity", "evidence"]
            }),
        ),
        tool(
            WAIT_FOR_CHILDREN,
            "Pause until every child agent has finished, then receive all of their results.",
            json!({
                "type": "object",
                "properties": {
                    "reason": {"type": "string", "description": "What you are waiting for"}
                }
            }),
        ),
    ];

    tools.push(if is_root {
        tool(
            FINISH_SCAN,
            "Finish the whole assessment. Children still running are awaited first.",
            json!({
                "type": "object",
                "properties": {
                    "content": {"type": "string", "description": "Final assessment summary"},
                    "success": {"type": "boolean", "description": "Whether the assessment completed"}
                },
                "required": ["content"]
            }),
        )
    } else {
        tool(
            AGENT_FINISH,
            "Finish your task and report back to your parent.",
            json!({
                "type": "object",
                "properties": {
                    "result_summary": {"type": "string", "description": "What you found or did"},
                    "success": {"type": "boolean", "description": "Whether the task was completed"}
                },
                "required": ["result_summary"]
            }),
        )
    });

    tools
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_root_and_child_finish_tools_differ() {
        let root: Vec<_> = tool_definitions(true).into_iter().map(|t| t.name).collect();
        let child: Vec<_> = tool_definitions(false).into_iter().map(|t| t.name).collect();
        assert!(root.contains(&FINISH_SCAN.to_string()));
        assert!(!root.contains(&AGENT_FINISH.to_string()));
        assert!(child.contains(&AGENT_FINISH.to_string()));
        assert_eq!(root.len(), child.len());
    }

    #[test]
    fn test_every_schema_is_an_object() {
        for tool in tool_definitions(true) {
            assert_eq!(tool.parameters["type"], "object", "{}", tool.name);
        }
    }

    #[test]
    fn test_sandbox_tools() {
        assert!(requires_sandbox(TERMINAL_EXECUTE));
        assert!(requires_sandbox(BROWSER_ACTION));
        assert!(requires_sandbox(STR_REPLACE_EDITOR));
        assert!(requires_sandbox(LIST_FILES));
        assert!(requires_sandbox(SEARCH_FILES));
        assert!(!requires_sandbox(ADD_NOTE));
        assert!(!requires_sandbox(CREATE_AGENT));
    }
}
