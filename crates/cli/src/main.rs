//! `agent-stack` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate` — check a workflow document and print its execution order.
//! - `run`      — execute a workflow and print the run summary.
//! - `show`     — print the summary a previous run persisted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use engine::{Engine, EngineError, ExecuteOptions, ExecutionStateStore, ExecutionSummary, Graph, WorkflowSpec};
use runtime::{Payload, RuntimeRegistry};

#[derive(Parser)]
#[command(
    name = "agent-stack",
    about = "Run declarative stacks of dependent agent tasks",
    version
)]
struct Cli {
    /// Log every task transition instead of only run-level events.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow document (YAML, or JSON by `.json` extension).
    Validate {
        path: PathBuf,
    },
    /// Execute a workflow once.
    Run {
        path: PathBuf,
        /// Initial input as a JSON object, given to every task.
        #[arg(long)]
        input: Option<String>,
        /// Whole-run timeout in seconds; 0 disables it.
        #[arg(long, env = "AGENT_STACK_TIMEOUT", default_value_t = 0)]
        timeout: u64,
        /// Runtime name; the registry default when omitted.
        #[arg(long, env = "AGENT_STACK_RUNTIME")]
        runtime: Option<String>,
        /// State store: `memory`, `file:<dir>` or `sqlite:<path>`.
        #[arg(long, env = "AGENT_STACK_STORE", default_value = "memory")]
        store: String,
        /// Run independent tasks of each ready set concurrently.
        #[arg(long)]
        parallel: bool,
        /// Write the final summary as JSON to this path.
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Print the persisted summary of a workflow's latest run.
    Show {
        workflow: String,
        #[arg(long, env = "AGENT_STACK_STORE")]
        store: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = dispatch(cli).await {
        eprintln!("❌ {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Validate { path } => validate(&path),
        Command::Run {
            path,
            input,
            timeout,
            runtime,
            store,
            parallel,
            export,
        } => {
            let mut options = ExecuteOptions::default()
                .with_timeout_secs(timeout)
                .parallel(parallel);
            if let Some(raw) = input {
                options = options.with_input(parse_input(&raw)?);
            }
            if let Some(name) = runtime {
                options = options.with_runtime(name);
            }
            run(&path, &store, options, export.as_deref(), cli.verbose).await
        }
        Command::Show { workflow, store } => show(&workflow, &store).await,
    }
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let spec = WorkflowSpec::load(path)?;
    let graph = Graph::build(&spec)?;
    println!("✅ Workflow '{}' is valid ({} tasks).", spec.name, graph.len());
    println!("   order:  {}", graph.order().join(" -> "));
    println!("   roots:  {}", graph.roots().join(", "));
    println!("   leaves: {}", graph.leaves().join(", "));
    for line in plan(&spec, &graph) {
        println!("   {line}");
    }
    Ok(())
}

/// One line per task in execution order: its runtime command and what it waits for.
fn plan(spec: &WorkflowSpec, graph: &Graph) -> Vec<String> {
    graph
        .order()
        .iter()
        .map(|id| {
            let uses = spec.task(id).map_or("", |t| t.uses.as_str());
            let after = graph
                .node(id)
                .map(|n| n.dependencies.join(", "))
                .unwrap_or_default();
            if after.is_empty() {
                format!("{id}: {uses}")
            } else {
                format!("{id}: {uses} (after {after})")
            }
        })
        .collect()
}

async fn run(
    path: &Path,
    store_url: &str,
    options: ExecuteOptions,
    export: Option<&Path>,
    verbose: bool,
) -> anyhow::Result<()> {
    let spec = WorkflowSpec::load(path)?;
    let base = store_url.to_owned();
    let engine = Arc::new(
        Engine::builder(spec)
            .registry(RuntimeRegistry::with_builtins())
            .store_factory(move |name| store::open_namespaced(&base, name))
            .verbose(verbose)
            .build()
            .await?,
    );

    let interrupt = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping after the current task");
                engine.stop();
            }
        })
    };

    let outcome = engine.execute(CancellationToken::new(), options).await;
    interrupt.abort();

    let summary = engine.get_state().await;
    print_summary(&summary);
    if let Some(path) = export {
        let bytes = engine.export().await?;
        tokio::fs::write(path, bytes)
            .await
            .with_context(|| format!("cannot write export to {}", path.display()))?;
        info!(path = %path.display(), "summary exported");
    }
    engine.shutdown().await?;

    match outcome {
        Ok(()) => Ok(()),
        Err(e @ EngineError::CompletedWithErrors { .. }) => bail!(e),
        Err(e) => Err(e).context("run did not finish"),
    }
}

async fn show(workflow: &str, store_url: &str) -> anyhow::Result<()> {
    let kv = store::open_namespaced(store_url, workflow)?;
    let state = ExecutionStateStore::restore(kv).await?;
    let summary = state.summary().await;
    state.close().await?;
    if summary.total_tasks == 0 {
        bail!("no recorded run for workflow '{workflow}' in {store_url}");
    }
    if summary.workflow_name != workflow {
        bail!(
            "store entry for '{workflow}' holds workflow '{}'",
            summary.workflow_name
        );
    }
    print_summary(&summary);
    Ok(())
}

fn parse_input(raw: &str) -> anyhow::Result<Payload> {
    let value: serde_json::Value = serde_json::from_str(raw).context("--input is not valid JSON")?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => bail!("--input must be a JSON object, got {other}"),
    }
}

fn print_summary(summary: &ExecutionSummary) {
    let marker = if summary.is_success() { "✅" } else { "⚠️" };
    println!(
        "{marker} {}: {}/{} completed, {} failed, {} blocked, {} pending",
        summary.workflow_name,
        summary.completed_count,
        summary.total_tasks,
        summary.failed_count,
        summary.blocked_count,
        summary.pending_count,
    );
    if let Some(id) = summary.execution_id {
        println!("   execution: {id}");
    }
    for (id, task) in &summary.tasks {
        match &task.error_message {
            Some(msg) => println!("   {id:<20} {:<10} {msg}", task.status),
            None => println!("   {id:<20} {}", task.status),
        }
    }
}
