//! TaskPilot CLI - run agent plans and inspect their results.

mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use taskpilot_core::{Event, EventType, Plan, Task, TaskFilter, TaskId, TaskStatus};
use taskpilot_execution::{EngineError, ExecutionEngine, TaskManager};
use taskpilot_storage::{JsonTaskStore, TaskStore};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::CliConfig;

#[derive(Parser)]
#[command(name = "taskpilot")]
#[command(about = "Dependency-aware task execution for autonomous agents", long_about = None)]
struct Cli {
    /// Config file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Task store directory
    #[arg(long, global = true, default_value = ".taskpilot")]
    store: PathBuf,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a plan
    Run {
        /// Plan file (JSON)
        #[arg(long, conflicts_with = "prompt", required_unless_present = "prompt")]
        plan: Option<PathBuf>,
        /// Build the fallback research plan for this prompt
        #[arg(long)]
        prompt: Option<String>,
        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Show task details
    Show {
        /// Task ID
        id: String,
    },
    /// List tasks
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
    },
    /// List registered tools
    Tools,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    let config = CliConfig::load(cli.config.as_deref())?;
    let registry = Arc::new(config.registry()?);

    match cli.command {
        Commands::Run { plan, prompt, json } => {
            let plan = match (plan, prompt) {
                (Some(path), _) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading plan {}", path.display()))?;
                    Plan::from_json(&raw)?
                }
                (None, Some(prompt)) => Plan::fallback(&prompt),
                (None, None) => bail!("either --plan or --prompt is required"),
            };

            let store: Arc<dyn TaskStore> = Arc::new(JsonTaskStore::new(&cli.store).await?);
            let manager = TaskManager::new(ExecutionEngine::new(registry, store, config.engine));
            run(&manager, plan, json).await?;
        }
        Commands::Show { id } => {
            let store = JsonTaskStore::new(&cli.store).await?;
            let Some(task) = store.load(&TaskId::from(id)).await? else {
                println!("Task not found");
                return Ok(());
            };
            print_task(&task);
        }
        Commands::List { status } => {
            let status = status
                .map(|s| s.parse::<TaskStatus>().map_err(anyhow::Error::msg))
                .transpose()?;
            let filter = TaskFilter {
                status: status.map(|s| vec![s]),
            };
            let store = JsonTaskStore::new(&cli.store).await?;
            let tasks = store.list(&filter).await?;

            println!("Tasks ({})", tasks.len());
            for task in tasks {
                let progress = task.progress();
                println!(
                    "  {} | {} | {}/{} steps | {}",
                    task.id,
                    task.status,
                    progress.completed,
                    task.steps.len(),
                    task.title,
                );
            }
        }
        Commands::Tools => {
            let tools = registry.list();
            println!("Tools ({})", tools.len());
            for tool in tools {
                let capabilities: Vec<&str> = tool.capabilities.iter().map(String::as_str).collect();
                println!(
                    "  {} | {} | ~{}ms | cost {:.2} | reliability {:.2}",
                    tool.id,
                    capabilities.join(","),
                    tool.time_estimate_ms,
                    tool.cost_estimate,
                    tool.reliability,
                );
            }
        }
    }

    Ok(())
}

/// Run a plan to the end, streaming its events. Ctrl-C cancels the task.
async fn run(manager: &TaskManager, plan: Plan, json: bool) -> Result<()> {
    let id = manager.create_task(plan).await?;
    let mut events = manager.subscribe();
    manager.start(&id).await?;
    info!(task_id = %id, "Running task");

    let watched = id.clone();
    let mut printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if event.task_id == watched => {
                    print_event(&event, json);
                    if matches!(event.event_type, EventType::TaskCompleted | EventType::TaskFailed) {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => warn!(missed, "Event stream lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::select! {
        _ = &mut printer => {}
        _ = tokio::signal::ctrl_c() => {
            println!("Cancelling {}...", id);
            match manager.cancel(&id).await {
                Ok(()) | Err(EngineError::NotRunning(_)) => {}
                Err(e) => return Err(e.into()),
            }
            let _ = printer.await;
        }
    }

    let summary = manager.wait(&id).await?;
    let progress = summary.task.progress();
    println!(
        "Task {} {} ({}/{} steps, {} replans)",
        summary.task.id,
        summary.status(),
        progress.completed,
        summary.task.steps.len(),
        summary.task.replan_count,
    );

    if summary.status() != TaskStatus::Completed {
        bail!("task {} ended {}", summary.task.id, summary.status());
    }
    Ok(())
}

fn print_event(event: &Event, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!(error = %e, "Could not encode event"),
        }
        return;
    }

    let subject = event.step_id.as_ref().map(|s| s.to_string()).unwrap_or_else(|| "task".to_string());
    match &event.detail {
        Some(detail) if event.event_type != EventType::StepCompleted => {
            println!("[{}] {:<15} {:<8} {} {}", event.timestamp.format("%H:%M:%S"), event.event_type, subject, event.status, detail)
        }
        _ => println!("[{}] {:<15} {:<8} {}", event.timestamp.format("%H:%M:%S"), event.event_type, subject, event.status),
    }
}

fn print_task(task: &Task) {
    println!("Task: {}", task.id);
    println!("  Title: {}", task.title);
    if !task.goal.is_empty() {
        println!("  Goal: {}", task.goal);
    }
    println!("  Status: {}", task.status);
    println!("  Replans: {}/{}", task.replan_count, task.max_replans);
    println!("  Estimated: {}ms", task.estimated_duration_ms);
    println!("  Created: {}", task.created_at);
    println!("  Steps:");
    for step in &task.steps {
        println!(
            "    {} | {} | {} | retries {}/{} | {} runs",
            step.id,
            step.status,
            step.title,
            step.retry_count,
            step.max_retries,
            step.executions.len(),
        );
        if let Some(error) = &step.error_message {
            println!("      error: {}", error);
        }
    }
}
