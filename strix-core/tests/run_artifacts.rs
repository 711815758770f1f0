//! A run's on-disk artifacts: audit database, redacted config and exported reports
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

mod common;

use chrono::Utc;
use tempfile::TempDir;

use common::{config, finish, harness, report, spawn, terminal, Scripted};
use strix_core::agents::Action;
use strix_core::knowledge::Severity;
use strix_core::reports::{
    export_json, export_markdown, ReportMetadata, ResultAggregator, RiskRating,
};
use strix_core::state::{RunDirectory, SqliteAuditLog};

#[tokio::test(start_paused = true)]
async fn test_run_leaves_audit_trail_and_reports() {
    let runs = TempDir::new().unwrap();
    let dir = RunDirectory::create(runs.path(), "silent-shell-404").unwrap();

    let mut cfg = config(3);
    cfg.provider.api_key = Some("sk-secret".to_string());
    dir.write_config(&cfg).unwrap();

    let reasoner = Scripted::default()
        .script("root", vec![spawn("recon"), Action::WaitForChildren, finish("one reflected xss")])
        .script(
            "recon",
            vec![
                terminal("curl -s 'https://shop.test/search?q=<svg>'"),
                report("reflected_xss", "https://shop.test/search?q=1", Severity::Medium, "<svg onload=alert(1)> reflected"),
                finish("xss in search"),
            ],
        );
    let started = Utc::now();
    let h = harness(
        reasoner,
        cfg,
        SqliteAuditLog::open(dir.audit_db(), &dir.name).unwrap(),
    );

    let outcome = h.scheduler.run("root", "assess shop.test").await.unwrap();
    let metrics = h.scheduler.metrics().snapshot();
    h.audit.save_metrics(&metrics).unwrap();

    let report_data = ResultAggregator::collect(
        h.scheduler.knowledge(),
        &outcome,
        &metrics,
        ReportMetadata::new(&dir.name, vec!["https://shop.test".to_string()], started, Utc::now()),
    )
    .await;
    export_json(&report_data, dir.report_json()).unwrap();
    export_markdown(&report_data, dir.report_markdown()).unwrap();
    drop(h);

    // config is written without the key
    let written = std::fs::read_to_string(dir.config_file()).unwrap();
    assert!(!written.contains("sk-secret"));

    // audit database survives the run and can be reopened
    let audit = SqliteAuditLog::open(dir.audit_db(), &dir.name).unwrap();
    let states = audit.agent_states().unwrap();
    assert_eq!(states.len(), 2);
    assert!(states.iter().all(|(_, state)| state == "succeeded"));
    let findings = audit.findings().unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].0, "xss");
    assert_eq!(findings[0].1, "shop.test/search");

    let recon = outcome.results.iter().find(|r| r.name == "recon").unwrap();
    let calls = audit.tool_calls_for(&recon.agent_id).unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].1, "terminal_execute");

    // exported reports
    assert_eq!(report_data.summary.risk_rating, RiskRating::Medium);
    assert_eq!(report_data.summary.executive_summary, "one reflected xss");
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.report_json()).unwrap()).unwrap();
    assert_eq!(json["findings"].as_array().unwrap().len(), 1);
    assert_eq!(json["metrics"]["tool_calls"], metrics.tool_calls);
    let markdown = std::fs::read_to_string(dir.report_markdown()).unwrap();
    assert!(markdown.contains("[Medium]"));
    assert!(markdown.contains("| recon ("));
}

#[test]
fn test_run_directory_refuses_to_reuse_a_name() {
    let runs = TempDir::new().unwrap();
    RunDirectory::create(runs.path(), "ghost-daemon-111").unwrap();
    assert!(RunDirectory::create(runs.path(), "ghost-daemon-111").is_err());
    assert!(RunDirectory::create(runs.path(), "../escape").is_err());

    let unique = RunDirectory::create_unique(runs.path()).unwrap();
    assert!(unique.path.starts_with(runs.path()));
    assert!(unique.path.is_dir());
}
