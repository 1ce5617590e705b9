use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hconductor::config::Config;
use hconductor::dispatch::ModelDispatcher;
use hconductor::loop_exec::ExecutionLoop;
use hconductor::pipeline::{Pipeline, PipelineConfig};
use hconductor::queue_store::QueueStore;
use hconductor::selector::TaskSelector;
use hconductor::workspace::WorkspaceManager;

/// Drives a task queue through the Red/Green/Refactor cycle against an
/// isolated git worktree per task.
#[derive(Parser, Debug)]
#[command(name = "hconductor", version, about)]
struct Cli {
    /// Path to the task queue JSON file.
    #[arg(long)]
    queue: std::path::PathBuf,

    /// Git repository to operate against.
    #[arg(long, default_value = ".")]
    repo: std::path::PathBuf,

    /// Stop after running this many tasks.
    #[arg(long)]
    max_tasks: Option<u32>,

    /// Branch to merge completed task branches into.
    #[arg(long, default_value = "main")]
    target_branch: String,

    /// Skip the quality gate stage.
    #[arg(long)]
    no_qa: bool,

    /// Skip the traceability gate stage.
    #[arg(long)]
    no_traceability: bool,

    /// JSON file mapping goal id to goal description, used by the traceability gate.
    #[arg(long)]
    northstar_goals: Option<std::path::PathBuf>,

    /// Shell command that runs the project's existing regression suite
    /// (e.g. "pytest tests/"), checked by the quality gate for silent
    /// regressions outside the task's own new test. Omit to skip this check.
    #[arg(long)]
    existing_test_command: Option<String>,

    /// Enable verbose (debug) logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false).compact();
    let filter_layer = tracing_subscriber::EnvFilter::from_default_env().add_directive(log_level.into());
    tracing_subscriber::registry().with(filter_layer).with(fmt_layer).init();

    let config = Config::from_env();
    let queue_store = QueueStore::new(&cli.queue);
    let selector = TaskSelector::new(false, false);

    let base_dir = hconductor::pipeline::workspace_base_dir(&cli.repo);
    std::fs::create_dir_all(&base_dir).context("creating workspace base directory")?;
    let workspace_manager = WorkspaceManager::new(cli.repo.clone(), base_dir, config.disk_threshold);

    let fast = config.fast.clone();
    let balanced = config.balanced.clone();
    let strong = config.strong.clone();
    let dispatcher_factory: Box<dyn Fn() -> ModelDispatcher + Send + Sync> =
        Box::new(move || ModelDispatcher::new(fast.clone(), balanced.clone(), strong.clone()));

    let quality_gate = (!cli.no_qa).then(|| hconductor::quality::QualityGate::new(dispatcher_factory()));
    let goals: std::collections::HashMap<String, String> = match &cli.northstar_goals {
        Some(path) => {
            let raw = std::fs::read_to_string(path).context("reading northstar goals file")?;
            serde_json::from_str(&raw).context("parsing northstar goals file")?
        }
        None => Default::default(),
    };
    let traceability_gate =
        (!cli.no_traceability).then(|| hconductor::traceability::TraceabilityGate::new(goals));

    let pipeline = Pipeline::new(
        WorkspaceManager::new(cli.repo.clone(), hconductor::pipeline::workspace_base_dir(&cli.repo), config.disk_threshold),
        dispatcher_factory,
        "python3",
        120,
        quality_gate,
        traceability_gate,
        PipelineConfig {
            target_branch: cli.target_branch.clone(),
            run_qa: !cli.no_qa,
            run_traceability: !cli.no_traceability,
            max_green_retries: 5,
            existing_test_command: cli.existing_test_command.clone(),
        },
    );

    let mut exec_loop = ExecutionLoop::new(queue_store, selector, workspace_manager, pipeline, cli.max_tasks);

    let outcome = exec_loop.run().await.context("execution loop failed")?;
    tracing::info!(
        completed = outcome.completed.len(),
        blocked = outcome.blocked.len(),
        tasks_run = outcome.tasks_run,
        "execution loop finished"
    );

    Ok(())
}
