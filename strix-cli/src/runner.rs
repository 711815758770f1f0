//! Run driver: wires configuration, sandbox pool, audit log and scheduler
//! together and turns the outcome into reports and an exit code.

use std::fs::File;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use strix_core::agents::Prompts;
use strix_core::config::RunConfig;
use strix_core::events::EventSender;
use strix_core::graph::{RunOutcome, Scheduler, SchedulerDeps};
use strix_core::knowledge::KnowledgeStore;
use strix_core::providers::{create_provider, LlmReasoningClient};
use strix_core::reports::{
    export_json, export_markdown, ReportMetadata, ResultAggregator, RunReport,
};
use strix_core::sandbox::{DockerRuntime, PoolConfig, SandboxPool, SandboxRuntime};
use strix_core::state::{AuditSink, MetricsTracker, RunDirectory, SqliteAuditLog};
use strix_core::targets::{build_root_objective, TargetSet};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::args::Args;
use crate::tui::{self, App, ChannelEvents, UiEvent};

/// Name given to the root agent
const ROOT_AGENT: &str = "root";

/// Exit code when the run completed and reported findings
pub const EXIT_FINDINGS: i32 = 2;
/// Exit code when the run failed or was aborted
pub const EXIT_FAILURE: i32 = 1;

/// Execute one run; returns the process exit code
pub async fn run(args: Args) -> Result<i32> {
    let config = load_config(&args)?;
    let targets = TargetSet::from_strings(&args.target)?;

    let run_dir = match args.run_name.as_deref() {
        Some(name) => RunDirectory::create(&config.output.runs_dir, name)?,
        None => RunDirectory::create_unique(&config.output.runs_dir)?,
    };
    run_dir.write_config(&config)?;
    init_tracing(&args, &run_dir)?;
    info!(run = %run_dir.name, path = %run_dir.path.display(), "Run directory created");

    let (events, rx) = ChannelEvents::new();
    let cancel = CancellationToken::new();

    if args.non_interactive {
        println!("strix v{} | run {}", env!("CARGO_PKG_VERSION"), run_dir.name);
        let printer = tokio::spawn(print_events(rx));
        let code = drive(&args, &config, &targets, &run_dir, events, cancel).await;
        let _ = printer.await;
        return Ok(code);
    }

    let mut app = App::new(run_dir.name.clone(), targets.labels(), Some(rx));
    let ui_cancel = cancel.clone();
    let ui = tokio::task::spawn_blocking(move || tui::runner::run(&mut app, &ui_cancel));

    let code = drive(&args, &config, &targets, &run_dir, events, cancel.clone()).await;

    // the dashboard stays up until the user leaves it
    ui.await
        .context("dashboard task panicked")?
        .context("terminal error")?;
    Ok(code)
}

/// Run to completion and report the outcome on the event channel.
///
/// Consumes `events` so the channel closes once the run is over.
async fn drive(
    args: &Args,
    config: &RunConfig,
    targets: &TargetSet,
    run_dir: &RunDirectory,
    events: ChannelEvents,
    cancel: CancellationToken,
) -> i32 {
    match execute(args, config, targets, run_dir, &events, cancel).await {
        Ok(report) => {
            let code = exit_code(&report);
            let message = finish_message(&report, run_dir);
            events.send(UiEvent::Finished {
                success: report.summary.aborted.is_none(),
                message,
            });
            code
        }
        Err(e) => {
            error!(error = %e, "Run failed");
            events.send(UiEvent::Finished {
                success: false,
                message: format!("Run failed: {e:#}"),
            });
            EXIT_FAILURE
        }
    }
}

fn load_config(args: &Args) -> Result<RunConfig> {
    let mut config = RunConfig::load(args.config.as_deref())?;
    config.apply_env_overrides();
    if let Some(model) = &args.model {
        config.provider.model = model.clone();
    }
    if let Some(max_agents) = args.max_agents {
        config.limits.max_agents = max_agents;
    }
    if let Some(max_sandboxes) = args.max_sandboxes {
        config.limits.max_sandboxes = max_sandboxes;
    }
    config.validate()?;
    Ok(config)
}

/// Log to the run directory under the dashboard, to stderr otherwise
fn init_tracing(args: &Args, run_dir: &RunDirectory) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_filter()));

    if args.non_interactive {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        let file = File::create(run_dir.log_file())
            .with_context(|| format!("creating {}", run_dir.log_file().display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .init();
    }
    Ok(())
}

async fn execute(
    args: &Args,
    config: &RunConfig,
    targets: &TargetSet,
    run_dir: &RunDirectory,
    events: &ChannelEvents,
    cancel: CancellationToken,
) -> Result<RunReport> {
    let started_at = Utc::now();

    events.send_feed("system", "Connecting to Docker", false);
    let runtime = DockerRuntime::connect(config.sandbox.clone())
        .await
        .context("Docker is not available")?
        .with_source_mounts(targets.source_mounts());
    runtime
        .ensure_image(|status| events.send_feed("docker", status, false))
        .await?;
    let runtime: Arc<dyn SandboxRuntime> = Arc::new(runtime);

    let pool = Arc::new(SandboxPool::new(
        runtime,
        PoolConfig {
            run_id: run_dir.name.clone(),
            policy: config.sandbox.policy,
            max_environments: config.limits.max_sandboxes,
            grace_timeout: config.grace_timeout(),
        },
    ));
    let orphans = pool.recover_orphans().await?;
    if orphans > 0 {
        events.send_feed(
            "system",
            &format!("Removed {orphans} sandbox(es) left over from earlier runs"),
            false,
        );
    }

    let audit = Arc::new(SqliteAuditLog::open(run_dir.audit_db(), &run_dir.name)?);
    audit.set_meta("targets", &targets.labels().join(", "))?;
    audit.set_meta("started_at", &started_at.to_rfc3339())?;
    audit.set_meta("status", "running")?;

    let metrics = MetricsTracker::new();
    let provider = create_provider(&config.provider)?;
    let reasoner = Arc::new(LlmReasoningClient::from_config(provider, config));

    let scheduler = Arc::new(Scheduler::new(
        config,
        SchedulerDeps {
            reasoner,
            pool: Arc::clone(&pool),
            knowledge: KnowledgeStore::with_mirror(audit.clone()),
            audit: audit.clone() as Arc<dyn AuditSink>,
            events: Arc::new(events.clone()),
            metrics: metrics.clone(),
            prompts: Arc::new(Prompts::default()),
        },
    ));

    let watcher = tokio::spawn(cancel_on_interrupt(Arc::clone(&scheduler), cancel.clone()));

    let objective = build_root_objective(targets, args.instruction.as_deref());
    events.send_feed("system", &format!("Assessing {}", targets.labels().join(", ")), false);
    let outcome = scheduler.run(ROOT_AGENT, &objective).await;
    watcher.abort();

    // every environment goes, whatever the outcome
    let sweep = pool.release_all().await;
    info!(
        released = sweep.released,
        forced = sweep.forced,
        failed = sweep.failed,
        "Sandbox sweep finished"
    );
    if sweep.failed > 0 {
        events.send_feed(
            "system",
            &format!("{} sandbox(es) could not be removed", sweep.failed),
            true,
        );
    }

    let outcome = outcome?;
    let snapshot = metrics.snapshot();
    events.send_metrics(&snapshot);

    let finished_at = Utc::now();
    let status = run_status(&outcome, cancel.is_cancelled() || scheduler.is_terminating());
    if let Err(e) = audit
        .save_metrics(&snapshot)
        .and_then(|()| audit.set_meta("status", status))
        .and_then(|()| audit.set_meta("finished_at", &finished_at.to_rfc3339()))
    {
        warn!(error = %e, "Could not finalize audit log");
    }

    let report = ResultAggregator::collect(
        scheduler.knowledge(),
        &outcome,
        &snapshot,
        ReportMetadata::new(&run_dir.name, targets.labels(), started_at, finished_at),
    )
    .await;

    if config.output.export_json {
        export_json(&report, run_dir.report_json())?;
    }
    if config.output.export_markdown {
        export_markdown(&report, run_dir.report_markdown())?;
    }

    Ok(report)
}

/// Cancel the whole run on Ctrl-C or when the dashboard asks for it
async fn cancel_on_interrupt(scheduler: Arc<Scheduler>, cancel: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Could not listen for Ctrl-C");
                cancel.cancelled().await;
            } else {
                warn!("Interrupted, cancelling run");
            }
        }
        _ = cancel.cancelled() => {}
    }
    let cancelled = scheduler.cancel_run().await;
    info!(cancelled, "Run cancelled");
}

fn run_status(outcome: &RunOutcome, cancelled: bool) -> &'static str {
    if outcome.aborted.is_some() {
        "aborted"
    } else if cancelled {
        "cancelled"
    } else {
        "completed"
    }
}

fn exit_code(report: &RunReport) -> i32 {
    if report.summary.aborted.is_some() {
        EXIT_FAILURE
    } else if report.has_findings() {
        EXIT_FINDINGS
    } else {
        0
    }
}

fn finish_message(report: &RunReport, run_dir: &RunDirectory) -> String {
    let summary = &report.summary;
    let headline = match &summary.aborted {
        Some(reason) => format!("Run aborted: {reason}"),
        None => "Run complete".to_string(),
    };
    format!(
        "{headline}. {} finding(s), risk {}; agents {} ok / {} failed / {} cancelled. Results in {}",
        summary.total_findings,
        summary.risk_rating,
        summary.agents_succeeded,
        summary.agents_failed,
        summary.agents_cancelled,
        run_dir.path.display()
    )
}

/// Non-interactive output: findings as they arrive, until the final line
async fn print_events(mut rx: mpsc::UnboundedReceiver<UiEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            UiEvent::Finding {
                title,
                key,
                severity,
                ..
            } => println!("[{severity}] {title} ({key})"),
            UiEvent::Feed {
                agent,
                message,
                is_error: true,
            } => eprintln!("[{agent}] {message}"),
            UiEvent::Result(result) if !result.succeeded() => {
                eprintln!("[{}] {} ({})", result.name, result.state, result.reason);
            }
            UiEvent::Finished { message, .. } => {
                println!("{message}");
                break;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use clap::Parser;
    use strix_core::agents::AgentId;
    use strix_core::knowledge::{CanonicalKey, Finding, FindingSubmission, Severity};

    fn report() -> RunReport {
        RunReport::new(ReportMetadata::new("r", vec![], Utc::now(), Utc::now()))
    }

    #[test]
    fn test_exit_code_reflects_findings_and_abort() {
        let mut report = report();
        assert_eq!(exit_code(&report), 0);

        report.findings.push(Finding::from_submission(
            FindingSubmission {
                class: "xss".to_string(),
                asset: "https://shop.test/".to_string(),
                title: "xss".to_string(),
                severity: Severity::Low,
                evidence: "<script> reflected".to_string(),
                agent_id: AgentId::from("agent_web"),
            },
            CanonicalKey::new("xss", "https://shop.test/"),
        ));
        assert_eq!(exit_code(&report), EXIT_FINDINGS);

        report.summary.aborted = Some("docker went away".to_string());
        assert_eq!(exit_code(&report), EXIT_FAILURE);
    }

    #[test]
    fn test_flags_override_config() {
        let args = Args::try_parse_from([
            "strix",
            "-t",
            "shop.test",
            "--model",
            "openai/gpt-4o",
            "--max-agents",
            "2",
            "--max-sandboxes",
            "1",
        ])
        .unwrap();
        let config = load_config(&args).unwrap();
        assert_eq!(config.provider.model, "openai/gpt-4o");
        assert_eq!(config.limits.max_agents, 2);
        assert_eq!(config.limits.max_sandboxes, 1);
    }

    #[test]
    fn test_zero_agents_rejected() {
        let args =
            Args::try_parse_from(["strix", "-t", "shop.test", "--max-agents", "0"]).unwrap();
        assert!(load_config(&args).is_err());
    }
}
