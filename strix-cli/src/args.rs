//! CLI argument parsing

use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "strix")]
#[command(author, version, about = "Multi-agent security testing orchestrator")]
pub struct Args {
    /// Target URL, domain, git repository or local directory (can be repeated)
    #[arg(short, long, required = true, action = ArgAction::Append)]
    pub target: Vec<String>,

    /// Extra instructions handed to the root agent
    #[arg(long)]
    pub instruction: Option<String>,

    /// Name of the run directory (generated when omitted)
    #[arg(long)]
    pub run_name: Option<String>,

    /// Print findings to stdout instead of showing the dashboard
    #[arg(short = 'n', long)]
    pub non_interactive: bool,

    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Model to use, as `provider/model`
    #[arg(long)]
    pub model: Option<String>,

    /// Maximum number of agents running at once
    #[arg(long)]
    pub max_agents: Option<usize>,

    /// Maximum number of live sandbox environments
    #[arg(long)]
    pub max_sandboxes: Option<usize>,

    /// Verbose output
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Default log filter for the verbosity level; `RUST_LOG` still wins
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "strix_core=info,strix=info",
            1 => "strix_core=debug,strix=debug",
            _ => "trace",
        }
    }
}
