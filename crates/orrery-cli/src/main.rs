//! `orrery` command-line entry point.

mod builtins;
mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::OrreryConfig;
use orrery_orchestrator::{AssistantRegistry, FileTaskStore, Orchestrator, TaskFeedback, TaskReport};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "orrery", about = "Orrery: priority task orchestration over assistant pipelines")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "orrery.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit task descriptors, wait for them and print their reports
    Run {
        /// JSON descriptor files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Route a feedback JSON file to the assistants of a task
    Feedback {
        task_id: String,
        file: PathBuf,
    },
    /// Print the stored report of a finished task
    Status {
        task_id: String,
    },
    /// Print the orchestrator's system status
    SystemStatus,
    /// List registered assistants and their capabilities
    Assistants,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = OrreryConfig::load(&cli.config).await?;
    let orchestrator = build_orchestrator(&config).await?;

    match cli.command {
        Commands::Run { files } => {
            orchestrator.start();
            let result = run_tasks(&orchestrator, &files).await;
            orchestrator.shutdown().await;
            print_json(&result?)?;
        }
        Commands::Status { task_id } => {
            let report = orchestrator
                .get_status(&task_id)
                .await
                .with_context(|| format!("No status for task '{task_id}'"))?;
            print_json(&report)?;
        }
        Commands::Feedback { task_id, file } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read '{}'", file.display()))?;
            let feedback: TaskFeedback = serde_json::from_str(&raw)?;
            orchestrator.submit_feedback(&task_id, feedback).await?;
            info!(task_id = %task_id, "Feedback delivered");
        }
        Commands::SystemStatus => {
            print_json(&orchestrator.system_status().await)?;
        }
        Commands::Assistants => {
            let snapshot = orchestrator.registry().snapshot();
            let listing: Vec<_> = snapshot
                .assistants()
                .iter()
                .map(|a| serde_json::json!({"name": a.name, "capabilities": a.capabilities}))
                .collect();
            print_json(&listing)?;
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn build_orchestrator(config: &OrreryConfig) -> anyhow::Result<Arc<Orchestrator>> {
    let registry = Arc::new(AssistantRegistry::new());
    builtins::register_builtins(&registry)?;
    for definition in &config.pipelines {
        registry.register_pipeline(definition.clone())?;
    }

    let store = FileTaskStore::new(config.tasks_dir())
        .await
        .with_context(|| format!("Failed to open task store at '{}'", config.tasks_dir().display()))?;
    let orchestrator =
        Orchestrator::with_store(config.orchestrator.clone(), registry, Arc::new(store))?;

    info!(
        workers = config.orchestrator.max_concurrent_tasks,
        data_dir = %config.data_dir.display(),
        "Orchestrator ready"
    );
    Ok(Arc::new(orchestrator))
}

async fn run_tasks(
    orchestrator: &Orchestrator,
    files: &[PathBuf],
) -> anyhow::Result<Vec<TaskReport>> {
    let mut ids = Vec::with_capacity(files.len());
    for file in files {
        let raw = tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("Failed to read '{}'", file.display()))?;
        let id = orchestrator
            .submit_json(&raw)
            .await
            .with_context(|| format!("Task in '{}' was rejected", file.display()))?;
        info!(task_id = %id, file = %file.display(), "Task submitted");
        ids.push(id);
    }

    let mut reports = Vec::with_capacity(ids.len());
    for id in &ids {
        reports.push(orchestrator.wait_for(id).await?);
    }

    Ok(reports)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
