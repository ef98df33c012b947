//! Sandcrew CLI - launch sandboxes and manage task state.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sandcrew_sandbox::CsRunner;

mod error;
mod launch;
mod task;

use error::CliError;
use launch::{GhProbe, LaunchArgs, LaunchOutcome};
use task::TaskArgs;

/// Sandcrew CLI - run Claude Code tasks in remote sandboxes
#[derive(Parser)]
#[command(name = "sandcrew")]
#[command(about = "Launch Claude Code sandboxes and manage their task state", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or resume a sandbox and hand it a prompt
    Launch(LaunchArgs),

    /// Inspect or edit a task state document
    Task(TaskArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::from_default_env();
    let filter = match "sandcrew=info".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Launch(args) => launch_sandbox(args).await,
        Commands::Task(args) => run_task(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[ERROR] {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn launch_sandbox(args: LaunchArgs) -> Result<(), CliError> {
    let backend = CsRunner::new();
    let probe = GhProbe::default();

    match launch::run(&args, &backend, &probe).await? {
        LaunchOutcome::DryRun(plan) => print!("{plan}"),
        LaunchOutcome::Provisioned { name, resumed } => {
            let verb = if resumed { "resumed" } else { "created" };
            println!("[SUCCESS] Sandbox \"{name}\" {verb} and configured.");
        }
    }
    Ok(())
}

fn run_task(args: TaskArgs) -> Result<(), CliError> {
    let path = args.state_path()?;
    let output = task::execute(&path, &args.command)?;
    println!("{output}");
    Ok(())
}
