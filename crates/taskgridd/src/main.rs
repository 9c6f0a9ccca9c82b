//! taskgridd: the TaskGrid daemon.
//!
//! Runs a batch of analysis tasks through a [`TaskEngine`] using the
//! built-in slide-deck handlers, then prints a JSON report.
//!
//! # Usage
//!
//! ```text
//! taskgridd run --tasks batch.json --config taskgrid.toml
//! taskgridd config --config taskgrid.toml
//! ```

mod batch;
mod handlers;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use taskgrid_core::ConfigFile;
use taskgrid_engine::TaskEngine;

#[derive(Parser)]
#[command(name = "taskgridd", about = "TaskGrid parallel task-processing daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process a task batch and print the results.
    Run {
        /// JSON file holding the task batch.
        #[arg(long)]
        tasks: PathBuf,

        /// Engine configuration (TOML). Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Overall wait budget for the batch, in seconds.
        #[arg(long, default_value = "300")]
        wait_secs: u64,

        /// Also print metrics in Prometheus text format.
        #[arg(long)]
        prometheus: bool,
    },
    /// Print the effective configuration as TOML.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run {
            tasks,
            config,
            wait_secs,
            prometheus,
        } => run(&tasks, config.as_deref(), Duration::from_secs(wait_secs), prometheus).await,
        Command::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,taskgrid=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ConfigFile> {
    match path {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(ConfigFile::default()),
    }
}

async fn run(
    tasks_path: &Path,
    config_path: Option<&Path>,
    wait: Duration,
    prometheus: bool,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let entries = batch::load(tasks_path)?;
    info!(tasks = entries.len(), path = %tasks_path.display(), "task batch loaded");

    let engine = TaskEngine::new(config.engine, handlers::registry())?;
    engine.start().await?;

    let submitted = batch::submit(&engine, entries).await?;
    let outcomes = tokio::select! {
        outcomes = batch::collect(&engine, submitted, wait) => outcomes,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, stopping engine");
            engine.stop().await?;
            anyhow::bail!("interrupted before the batch finished");
        }
    };

    let metrics = engine.get_metrics().await;
    let exposition = if prometheus {
        Some(engine.prometheus().await)
    } else {
        None
    };
    engine.stop().await?;

    let unfinished = outcomes.iter().filter(|o| o.result.is_none()).count();
    if unfinished > 0 {
        warn!(unfinished, "some tasks did not finish within the wait budget");
    }

    let report = json!({ "tasks": outcomes, "metrics": metrics });
    println!("{}", serde_json::to_string_pretty(&report)?);
    if let Some(text) = exposition {
        print!("{text}");
    }
    Ok(())
}
