//! Drains the knowledge store and the graph's terminal results into a report

use std::collections::HashMap;

use tracing::info;

use super::models::{AgentOutcome, ReportMetadata, ReportMetrics, RunReport};
use crate::graph::RunOutcome;
use crate::knowledge::KnowledgeStore;
use crate::state::Metrics;

pub struct ResultAggregator;

impl ResultAggregator {
    /// Build the final report once the graph has reached global termination.
    ///
    /// Findings from failed or cancelled agents are kept; the store is never
    /// pruned on agent failure.
    pub async fn collect(
        knowledge: &KnowledgeStore,
        outcome: &RunOutcome,
        metrics: &Metrics,
        metadata: ReportMetadata,
    ) -> RunReport {
        let mut report = RunReport::new(metadata);

        report.findings = knowledge.findings().await;
        report.notes = knowledge.notes().await;

        let parents: HashMap<_, _> = outcome
            .agents
            .iter()
            .map(|a| (a.id.clone(), a.parent.clone()))
            .collect();
        report.agents = outcome
            .results
            .iter()
            .map(|r| AgentOutcome::from_result(r, parents.get(&r.agent_id).cloned().flatten()))
            .collect();

        report.metrics = ReportMetrics {
            tool_calls: metrics.tool_calls,
            tool_failures: metrics.tool_failures,
            reasoning_calls: metrics.reasoning_calls,
            reasoning_failures: metrics.reasoning_failures,
            agents_spawned: metrics.agents_spawned,
            input_tokens: metrics.tokens.input,
            output_tokens: metrics.tokens.output,
            peak_running_agents: outcome.peak_running,
        };

        report.summary.executive_summary = outcome
            .root
            .as_ref()
            .map(|r| r.summary.clone())
            .unwrap_or_default();
        report.summary.aborted = outcome.aborted.clone();
        report.update_summary();

        info!(
            findings = report.findings.len(),
            agents = report.agents.len(),
            risk = %report.summary.risk_rating,
            "Results aggregated"
        );
        report
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::agents::{AgentId, AgentState, TerminationReason, TerminationResult};
    use crate::graph::AgentSnapshot;
    use crate::knowledge::{FindingSubmission, Severity};
    use chrono::Utc;

    fn submission(agent: &str, severity: Severity, evidence: &str) -> FindingSubmission {
        FindingSubmission {
            class: "SQL Injection".to_string(),
            asset: "https://shop.test/login?next=/".to_string(),
            title: "SQLi in login".to_string(),
            severity,
            evidence: evidence.to_string(),
            agent_id: AgentId::from(agent),
        }
    }

    fn snapshot(id: &str, parent: Option<&str>, state: AgentState) -> AgentSnapshot {
        AgentSnapshot {
            id: AgentId::from(id),
            name: id.to_string(),
            objective: String::new(),
            parent: parent.map(AgentId::from),
            children: vec![],
            state,
            reason: None,
            steps_used: 0,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_collect_keeps_findings_of_failed_agents() {
        let store = KnowledgeStore::new();
        store
            .report_finding(submission("agent_a", Severity::High, "' OR 1=1 --"))
            .await
            .unwrap();
        store
            .report_finding(submission("agent_b", Severity::Critical, "sqlmap dump"))
            .await
            .unwrap();
        store
            .note("endpoints", "/login, /search", &AgentId::from("agent_a"))
            .await
            .unwrap();

        let outcome = RunOutcome {
            root: Some(TerminationResult::new(
                AgentId::from("agent_root"),
                "root",
                TerminationReason::Completed,
                "one critical SQLi",
                10,
            )),
            results: vec![
                TerminationResult::new(AgentId::from("agent_a"), "agent_a", TerminationReason::Completed, "", 4),
                TerminationResult::new(AgentId::from("agent_b"), "agent_b", TerminationReason::Timeout, "", 9),
                TerminationResult::new(AgentId::from("agent_root"), "root", TerminationReason::Completed, "one critical SQLi", 10),
            ],
            agents: vec![
                snapshot("agent_root", None, AgentState::Succeeded),
                snapshot("agent_a", Some("agent_root"), AgentState::Succeeded),
                snapshot("agent_b", Some("agent_root"), AgentState::Failed),
            ],
            aborted: None,
            peak_running: 2,
        };
        let metrics = Metrics {
            tool_calls: 23,
            ..Default::default()
        };

        let report = ResultAggregator::collect(
            &store,
            &outcome,
            &metrics,
            ReportMetadata::new("run", vec!["https://shop.test".into()], Utc::now(), Utc::now()),
        )
        .await;

        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].severity, Severity::Critical);
        assert_eq!(report.findings[0].evidence.len(), 2);
        assert_eq!(report.summary.agents_failed, 1);
        assert_eq!(report.summary.agents_succeeded, 2);
        assert_eq!(report.summary.executive_summary, "one critical SQLi");
        assert_eq!(report.metrics.tool_calls, 23);
        assert_eq!(report.metrics.peak_running_agents, 2);
        assert_eq!(report.agents[0].parent, Some(AgentId::from("agent_root")));
        assert_eq!(report.notes.len(), 1);
    }
}
