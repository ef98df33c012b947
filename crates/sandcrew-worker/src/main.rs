//! Sandcrew worker
//!
//! Runs inside the sandbox once per invocation: prepares the environment,
//! picks up the current task, runs Claude Code on it and persists the result.

use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod executor;
mod runner;
mod setup;

use config::WorkerConfig;
use runner::{WorkerLoop, WorkerReport};

/// Exit code for a failed worker pass.
const EXIT_RUN_FAILED: u8 = 23;

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout carries the agent stream echo.
    let filter = EnvFilter::from_default_env();
    let filter = match "sandcrew=info".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    match run().await {
        Ok(report) => {
            info!(
                task_id = ?report.task_id.as_ref().map(|id| id.as_str()),
                session_id = ?report.session_id,
                agent_ran = report.agent_ran,
                agent_error = ?report.agent_error,
                "Worker pass finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Worker run failed");
            ExitCode::from(EXIT_RUN_FAILED)
        }
    }
}

async fn run() -> Result<WorkerReport, Box<dyn std::error::Error>> {
    let env = config::capture_env();
    let config = WorkerConfig::resolve(&env)?;

    info!(
        cmd_dir = %config.cmd_dir.display(),
        state_path = %config.state_path.display(),
        repo_dir = %config.repo_dir.display(),
        has_github_token = config.github.token.is_some(),
        debug = config.debug,
        "Starting sandcrew worker"
    );

    setup::run_setup(&config).await;

    let report = WorkerLoop::new(config).run().await?;
    Ok(report)
}
