//! Text tool-call format used by reasoning responses
//!
//! Models emit one invocation per turn as
//! `<function=NAME><parameter=KEY>VALUE</parameter></function>`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

#[allow(clippy::expect_used)]
static FUNCTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<function=([^>]+)>\n?(.*?)</function>").expect("function regex is valid")
});

#[allow(clippy::expect_used)]
static PARAMETER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<parameter=([^>]+)>(.*?)</parameter>").expect("parameter regex is valid")
});

#[allow(clippy::expect_used)]
static INCOMPLETE_FUNCTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<function=[^>]+>.*$").expect("incomplete regex is valid"));

#[allow(clippy::expect_used)]
static HIDDEN_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<inter_agent_message>.*?</inter_agent_message>|<agent_completion_report>.*?</agent_completion_report>")
        .expect("hidden block regex is valid")
});

#[allow(clippy::expect_used)]
static BLANK_LINES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*\n").expect("blank line regex is valid"));

/// A single decoded invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub name: String,
    pub args: Map<String, Value>,
}

/// Close a single dangling `<function=` block that was cut off by a stop sequence
pub fn fix_incomplete_tool_call(content: &str) -> String {
    if content.matches("<function=").count() == 1 && !content.contains("</function>") {
        let trimmed = content.trim_end();
        if trimmed.ends_with("</") {
            return format!("{trimmed}function>");
        }
        return format!("{trimmed}\n</function>");
    }
    content.to_string()
}

/// Drop everything from the second invocation onward; only one action is taken per turn
pub fn truncate_to_first_function(content: &str) -> &str {
    let mut starts = content.match_indices("<function=").map(|(i, _)| i);
    match (starts.next(), starts.next()) {
        (Some(_), Some(second)) => content[..second].trim_end(),
        _ => content,
    }
}

/// Extract every well-formed invocation from the text
pub fn parse_tool_invocations(content: &str) -> Vec<ToolInvocation> {
    let content = fix_incomplete_tool_call(content);

    FUNCTION_RE
        .captures_iter(&content)
        .map(|caps| {
            let name = caps.get(1).map_or("", |m| m.as_str()).trim().to_string();
            let body = caps.get(2).map_or("", |m| m.as_str());
            let args = PARAMETER_RE
                .captures_iter(body)
                .map(|p| {
                    let key = p.get(1).map_or("", |m| m.as_str()).trim().to_string();
                    let value = unescape_html(p.get(2).map_or("", |m| m.as_str()).trim());
                    (key, Value::String(value))
                })
                .collect();
            ToolInvocation { name, args }
        })
        .collect()
}

/// Render an invocation back into the text format, for conversation replay
pub fn format_tool_call(name: &str, args: &Map<String, Value>) -> String {
    let mut parts = vec![format!("<function={name}>")];
    for (key, value) in args {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        parts.push(format!("<parameter={key}>{rendered}</parameter>"));
    }
    parts.push("</function>".to_string());
    parts.join("\n")
}

/// Strip invocations and internal markup, leaving the model's prose
pub fn clean_content(content: &str) -> String {
    if content.is_empty() {
        return String::new();
    }

    let fixed = fix_incomplete_tool_call(content);
    let without_calls = FUNCTION_RE.replace_all(&fixed, "");
    let without_partial = INCOMPLETE_FUNCTION_RE.replace_all(&without_calls, "");
    let without_hidden = HIDDEN_BLOCK_RE.replace_all(&without_partial, "");
    let mut cleaned = BLANK_LINES_RE
        .replace_all(&without_hidden, "\n\n")
        .trim()
        .to_string();

    // a tag cut mid-word at the very end ("<fun")
    if let Some(pos) = cleaned.rfind('<') {
        let tail = &cleaned[pos..];
        if tail.len() > 1 && "<function=".starts_with(tail) {
            cleaned.truncate(pos);
        }
    }
    cleaned.trim().to_string()
}

fn unescape_html(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}
