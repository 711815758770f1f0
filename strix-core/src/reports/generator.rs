//! Report export

use std::path::Path;

use crate::knowledge::Severity;
use crate::Result;

use super::models::RunReport;

/// Export report to JSON file
pub fn export_json(report: &RunReport, path: impl AsRef<Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Export report to Markdown file
pub fn export_markdown(report: &RunReport, path: impl AsRef<Path>) -> Result<()> {
    let markdown = generate_markdown(report);
    std::fs::write(path, markdown)?;
    Ok(())
}

fn label(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "Critical",
        Severity::High => "High",
        Severity::Medium => "Medium",
        Severity::Low => "Low",
        Severity::Info => "Info",
    }
}

/// Generate markdown report content
pub fn generate_markdown(report: &RunReport) -> String {
    let mut md = String::new();

    md.push_str(&format!("# {}\n\n", report.metadata.title));

    md.push_str("## Report Information\n\n");
    md.push_str(&format!("- **Run:** {}\n", report.metadata.run_name));
    md.push_str("- **Targets:**\n");
    for target in &report.metadata.targets {
        md.push_str(&format!("  - {}\n", target));
    }
    md.push_str(&format!(
        "- **Assessment Period:** {} to {}\n",
        report.metadata.started_at.format("%Y-%m-%d %H:%M UTC"),
        report.metadata.finished_at.format("%Y-%m-%d %H:%M UTC")
    ));
    md.push_str(&format!(
        "- **Report Generated:** {}\n\n",
        report.metadata.generated_at.format("%Y-%m-%d %H:%M UTC")
    ));

    if let Some(ref message) = report.summary.aborted {
        md.push_str(&format!(
            "> **Run aborted:** {}. Results below are partial.\n\n",
            message
        ));
    }

    md.push_str("## Executive Summary\n\n");
    md.push_str(&format!(
        "Overall Risk Rating: **{}**\n\n",
        report.summary.risk_rating
    ));
    if !report.summary.executive_summary.is_empty() {
        md.push_str(&format!("{}\n\n", report.summary.executive_summary));
    }

    md.push_str("### Finding Summary\n\n");
    md.push_str("| Severity | Count |\n|----------|-------|\n");
    for severity in [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ] {
        md.push_str(&format!(
            "| {} | {} |\n",
            label(severity),
            report.summary.by_severity.get(severity)
        ));
    }
    md.push_str(&format!(
        "| **Total** | **{}** |\n\n",
        report.summary.total_findings
    ));

    md.push_str("## Assessment Metrics\n\n");
    md.push_str(&format!(
        "- **Agents:** {} succeeded, {} failed, {} cancelled (peak {} running)\n",
        report.summary.agents_succeeded,
        report.summary.agents_failed,
        report.summary.agents_cancelled,
        report.metrics.peak_running_agents
    ));
    md.push_str(&format!(
        "- **Tool Executions:** {} ({} failed)\n",
        report.metrics.tool_calls, report.metrics.tool_failures
    ));
    md.push_str(&format!(
        "- **Reasoning Calls:** {} ({} failed)\n",
        report.metrics.reasoning_calls, report.metrics.reasoning_failures
    ));
    md.push_str(&format!(
        "- **LLM Tokens Used:** {} input, {} output\n\n",
        report.metrics.input_tokens, report.metrics.output_tokens
    ));

    md.push_str("## Detailed Findings\n\n");
    if report.findings.is_empty() {
        md.push_str("No vulnerabilities were identified during this assessment.\n\n");
    } else {
        for (i, finding) in report.findings.iter().enumerate() {
            md.push_str(&format!(
                "### {}. {} [{}]\n\n",
                i + 1,
                finding.title,
                label(finding.severity)
            ));
            md.push_str(&format!("**Class:** {}\n\n", finding.key.class));
            md.push_str(&format!("**Affected:** {}\n\n", finding.key.asset));
            md.push_str(&format!(
                "**Reported by:** {} at {}\n\n",
                finding.discovered_by,
                finding.discovered_at.format("%Y-%m-%d %H:%M UTC")
            ));

            md.push_str(&format!("**Evidence ({}):**\n\n", finding.evidence.len()));
            for evidence in &finding.evidence {
                md.push_str(&format!(
                    "- {} ({}):\n\n```\n{}\n```\n\n",
                    evidence.agent_id,
                    evidence.severity,
                    evidence.content.trim_end()
                ));
            }

            md.push_str("---\n\n");
        }
    }

    if !report.agents.is_empty() {
        md.push_str("## Agents\n\n");
        md.push_str("| Agent | Parent | State | Reason | Steps |\n");
        md.push_str("|-------|--------|-------|--------|-------|\n");
        for agent in &report.agents {
            md.push_str(&format!(
                "| {} ({}) | {} | {} | {} | {} |\n",
                agent.name,
                agent.agent_id,
                agent
                    .parent
                    .as_ref()
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                agent.state,
                agent.reason,
                agent.steps_used
            ));
        }
        md.push('\n');
    }

    if !report.notes.is_empty() {
        md.push_str("## Notes\n\n");
        for (tag, notes) in &report.notes {
            md.push_str(&format!("### {}\n\n", tag));
            for note in notes {
                md.push_str(&format!("- {} ({})\n", note.text, note.agent_id));
            }
            md.push('\n');
        }
    }

    md.push_str("## Disclaimer\n\n");
    md.push_str(
        "This report was generated by an automated, LLM-driven multi-agent assessment. ",
    );
    md.push_str(
        "Findings should be validated by qualified security professionals before taking action.\n",
    );

    md
}
