//! strix: run a team of LLM agents against a target from the command line

mod args;
mod runner;
mod tui;

use clap::Parser;

use args::Args;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let code = match runner::run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            runner::EXIT_FAILURE
        }
    };
    std::process::exit(code);
}
