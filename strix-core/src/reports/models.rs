//! Report data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::{AgentId, AgentState, TerminationReason, TerminationResult};
use crate::knowledge::{Finding, Note, Severity};

/// Overall risk rating for the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskRating {
    Critical,
    High,
    Medium,
    Low,
    Minimal,
}

impl RiskRating {
    /// Worst severity present decides the rating
    pub fn from_counts(counts: &SeverityCounts) -> Self {
        if counts.critical > 0 {
            Self::Critical
        } else if counts.high > 0 {
            Self::High
        } else if counts.medium > 0 {
            Self::Medium
        } else if counts.low > 0 {
            Self::Low
        } else {
            Self::Minimal
        }
    }
}

impl std::fmt::Display for RiskRating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "Critical"),
            Self::High => write!(f, "High"),
            Self::Medium => write!(f, "Medium"),
            Self::Low => write!(f, "Low"),
            Self::Minimal => write!(f, "Minimal"),
        }
    }
}

/// Finding counts by severity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    pub info: u32,
}

impl SeverityCounts {
    pub fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Info => self.info += 1,
        }
    }

    pub fn get(&self, severity: Severity) -> u32 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Info => self.info,
        }
    }

    pub fn total(&self) -> u32 {
        self.critical + self.high + self.medium + self.low + self.info
    }
}

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub title: String,
    pub run_name: String,
    pub targets: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
}

impl ReportMetadata {
    pub fn new(
        run_name: impl Into<String>,
        targets: Vec<String>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let title = match targets.as_slice() {
            [] => "Security Assessment Report".to_string(),
            [only] => format!("Security Assessment Report - {only}"),
            [first, rest @ ..] => {
                format!("Security Assessment Report - {first} (+{} more)", rest.len())
            }
        };
        Self {
            title,
            run_name: run_name.into(),
            targets,
            started_at,
            finished_at,
            generated_at: Utc::now(),
        }
    }
}

/// Run counters carried into the report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportMetrics {
    pub tool_calls: u64,
    pub tool_failures: u64,
    pub reasoning_calls: u64,
    pub reasoning_failures: u64,
    pub agents_spawned: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub peak_running_agents: usize,
}

/// How one agent ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub agent_id: AgentId,
    pub name: String,
    pub parent: Option<AgentId>,
    pub state: AgentState,
    pub reason: TerminationReason,
    pub summary: String,
    pub steps_used: u32,
}

impl AgentOutcome {
    pub fn from_result(result: &TerminationResult, parent: Option<AgentId>) -> Self {
        Self {
            agent_id: result.agent_id.clone(),
            name: result.name.clone(),
            parent,
            state: result.state,
            reason: result.reason.clone(),
            summary: result.summary.clone(),
            steps_used: result.steps_used,
        }
    }
}

/// Summary section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_findings: u32,
    pub by_severity: SeverityCounts,
    pub risk_rating: RiskRating,
    pub agents_succeeded: u32,
    pub agents_failed: u32,
    pub agents_cancelled: u32,
    /// Root agent's final summary
    pub executive_summary: String,
    /// Set when the run was aborted by an infrastructure failure
    pub aborted: Option<String>,
}

impl Default for ReportSummary {
    fn default() -> Self {
        Self {
            total_findings: 0,
            by_severity: SeverityCounts::default(),
            risk_rating: RiskRating::Minimal,
            agents_succeeded: 0,
            agents_failed: 0,
            agents_cancelled: 0,
            executive_summary: String::new(),
            aborted: None,
        }
    }
}

/// Final, deduplicated result of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub metadata: ReportMetadata,
    pub summary: ReportSummary,
    pub metrics: ReportMetrics,
    /// Sorted by severity (worst first), then canonical key
    pub findings: Vec<Finding>,
    pub agents: Vec<AgentOutcome>,
    /// Notes grouped by tag
    pub notes: Vec<(String, Vec<Note>)>,
}

impl RunReport {
    pub fn new(metadata: ReportMetadata) -> Self {
        Self {
            metadata,
            summary: ReportSummary::default(),
            metrics: ReportMetrics::default(),
            findings: Vec::new(),
            agents: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn has_findings(&self) -> bool {
        !self.findings.is_empty()
    }

    /// Sort findings and recompute the summary counts
    pub fn update_summary(&mut self) {
        self.findings
            .sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.key.cmp(&b.key)));

        let mut counts = SeverityCounts::default();
        for finding in &self.findings {
            counts.add(finding.severity);
        }
        self.summary.total_findings = counts.total();
        self.summary.risk_rating = RiskRating::from_counts(&counts);
        self.summary.by_severity = counts;

        self.summary.agents_succeeded = self.count_agents(AgentState::Succeeded);
        self.summary.agents_failed = self.count_agents(AgentState::Failed);
        self.summary.agents_cancelled = self.count_agents(AgentState::Cancelled);
    }

    fn count_agents(&self, state: AgentState) -> u32 {
        self.agents.iter().filter(|a| a.state == state).count() as u32
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::knowledge::{CanonicalKey, FindingSubmission};

    fn finding(class: &str, asset: &str, severity: Severity) -> Finding {
        Finding::from_submission(
            FindingSubmission {
                class: class.to_string(),
                asset: asset.to_string(),
                title: format!("{class} on {asset}"),
                severity,
                evidence: "poc".to_string(),
                agent_id: AgentId::from("agent_a"),
            },
            CanonicalKey::new(class, asset),
        )
    }

    #[test]
    fn test_risk_rating_from_counts() {
        let mut counts = SeverityCounts::default();
        assert_eq!(RiskRating::from_counts(&counts), RiskRating::Minimal);
        counts.add(Severity::Info);
        assert_eq!(RiskRating::from_counts(&counts), RiskRating::Minimal);
        counts.add(Severity::Low);
        assert_eq!(RiskRating::from_counts(&counts), RiskRating::Low);
        counts.add(Severity::High);
        assert_eq!(RiskRating::from_counts(&counts), RiskRating::High);
        counts.add(Severity::Critical);
        assert_eq!(RiskRating::from_counts(&counts), RiskRating::Critical);
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn test_update_summary_sorts_by_severity_then_key() {
        let mut report = RunReport::new(ReportMetadata::new(
            "ghost-shell-123",
            vec!["https://shop.test".to_string()],
            Utc::now(),
            Utc::now(),
        ));
        report.findings = vec![
            finding("xss", "/search", Severity::Medium),
            finding("sqli", "/login", Severity::Critical),
            finding("idor", "/api/orders", Severity::Medium),
        ];
        report.update_summary();

        let keys: Vec<String> = report.findings.iter().map(|f| f.key.to_string()).collect();
        assert_eq!(keys, vec!["sqli@/login", "idor@/api/orders", "xss@/search"]);
        assert_eq!(report.summary.total_findings, 3);
        assert_eq!(report.summary.by_severity.medium, 2);
        assert_eq!(report.summary.risk_rating, RiskRating::Critical);
    }

    #[test]
    fn test_metadata_title() {
        let one = ReportMetadata::new("r", vec!["a.test".into()], Utc::now(), Utc::now());
        assert_eq!(one.title, "Security Assessment Report - a.test");
        let many = ReportMetadata::new(
            "r",
            vec!["a.test".into(), "b.test".into(), "c.test".into()],
            Utc::now(),
            Utc::now(),
        );
        assert_eq!(many.title, "Security Assessment Report - a.test (+2 more)");
    }
}
