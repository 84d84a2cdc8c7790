use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use weir_execution::{Execution, StateType};
use weir_executor::{
  ChannelDispatcher, ExecutionKilledExecution, ExecutorCause, ExecutorRunner, LocalWorker,
};
use weir_runtime::{graph, parse_flow};
use weir_store::{ExecutionStore, InMemoryExecutionStore, InMemoryFlowRepository};
use weir_workflow::{Flow, FlowSource};

/// Weir - an event-driven workflow executor
#[derive(Parser)]
#[command(name = "weir")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Log filter used when RUST_LOG is not set
  #[arg(long, global = true, default_value = "info")]
  log_level: String,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a flow to completion. Inputs are read as a JSON object from stdin.
  Run {
    /// Path to the flow file (JSON)
    flow_file: PathBuf,

    /// Flow files callable as subflows
    #[arg(long = "subflow")]
    subflows: Vec<PathBuf>,
  },

  /// Check a flow definition
  Validate {
    /// Path to the flow file (JSON)
    flow_file: PathBuf,
  },

  /// Print the task graph of a flow as JSON
  Graph {
    /// Path to the flow file (JSON)
    flow_file: PathBuf,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .init();

  match cli.command {
    Some(Commands::Run {
      flow_file,
      subflows,
    }) => run_flow(flow_file, subflows)?,
    Some(Commands::Validate { flow_file }) => validate_flow(&flow_file)?,
    Some(Commands::Graph { flow_file }) => print_graph(&flow_file)?,
    None => {
      println!("weir - use --help to see available commands");
    }
  }

  Ok(())
}

fn load_source(path: &Path) -> Result<FlowSource> {
  let content = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read flow file: {}", path.display()))?;
  Ok(parse_flow(&content))
}

fn resolved(source: &FlowSource) -> Result<Arc<Flow>> {
  match source {
    FlowSource::Resolved(flow) => Ok(flow.clone()),
    FlowSource::Invalid(invalid) => bail!(
      "flow '{}.{}' is invalid: {}",
      invalid.namespace,
      invalid.id,
      invalid.error
    ),
  }
}

fn validate_flow(flow_file: &Path) -> Result<()> {
  let flow = resolved(&load_source(flow_file)?)?;
  println!(
    "flow '{}.{}' (revision {}) is valid: {} tasks",
    flow.namespace,
    flow.id,
    flow.revision,
    flow.tasks.len()
  );
  Ok(())
}

fn print_graph(flow_file: &Path) -> Result<()> {
  let flow = resolved(&load_source(flow_file)?)?;
  let cluster = graph::flow_graph(&flow, None);
  println!("{}", serde_json::to_string_pretty(&cluster)?);
  Ok(())
}

fn run_flow(flow_file: PathBuf, subflows: Vec<PathBuf>) -> Result<()> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run_flow_async(flow_file, subflows).await })
}

async fn run_flow_async(flow_file: PathBuf, subflows: Vec<PathBuf>) -> Result<()> {
  let source = load_source(&flow_file)?;
  let flow = resolved(&source)?;
  eprintln!("Loaded flow: {}.{}", flow.namespace, flow.id);

  let inputs = read_inputs_from_stdin()?;

  let repository = InMemoryFlowRepository::new();
  repository.insert(source).await;
  let mut called = Vec::new();
  for path in &subflows {
    let subflow = load_source(path)?;
    called.push(resolved(&subflow).with_context(|| format!("invalid subflow: {}", path.display()))?);
    repository.insert(subflow).await;
  }

  let store = Arc::new(InMemoryExecutionStore::new());
  let (dispatcher, dispatches) = ChannelDispatcher::channel();
  let runner = ExecutorRunner::new(store.clone(), Arc::new(repository), dispatcher);
  let sender = runner.sender();

  let (update_tx, mut updates) = mpsc::unbounded_channel();
  let cancel = CancellationToken::new();
  tokio::spawn(LocalWorker::new().run(dispatches, sender.clone(), Some(update_tx), cancel.clone()));

  let execution = runner
    .create_execution(&flow, inputs)
    .await
    .context("failed to create execution")?;
  eprintln!("Execution: {}", execution.id);

  let runner_handle = tokio::spawn(runner.start(cancel.clone()));
  let ended = wait_for_end(&execution, &mut updates, &sender).await;

  cancel.cancel();
  let _ = runner_handle.await;
  let ended = ended?;
  report_subflow_executions(store.as_ref(), &called).await?;

  println!("{}", serde_json::to_string_pretty(&ended)?);
  match ended.current() {
    StateType::Success | StateType::Warning => Ok(()),
    state => bail!("execution {} ended {}", ended.id, state),
  }
}

/// Print the executions started by subflow calls during the run.
async fn report_subflow_executions(store: &dyn ExecutionStore, called: &[Arc<Flow>]) -> Result<()> {
  for flow in called {
    let executions = store
      .list(&flow.namespace, &flow.id)
      .await
      .with_context(|| format!("failed to list executions of {}.{}", flow.namespace, flow.id))?;
    for execution in executions {
      eprintln!(
        "Subflow execution {} ({}.{}): {}",
        execution.id,
        flow.namespace,
        flow.id,
        execution.current()
      );
    }
  }
  Ok(())
}

/// Wait for the execution to end. Ctrl-C kills it.
async fn wait_for_end(
  execution: &Execution,
  updates: &mut mpsc::UnboundedReceiver<Execution>,
  sender: &mpsc::Sender<ExecutorCause>,
) -> Result<Execution> {
  let mut killing = false;

  loop {
    tokio::select! {
      update = updates.recv() => match update {
        Some(update) if update.id == execution.id && update.is_terminal() => return Ok(update),
        Some(update) if update.id == execution.id && update.is_paused() => {
          eprintln!("Execution paused, press Ctrl-C to kill it");
        }
        Some(_) => {}
        None => bail!("worker stopped before the execution ended"),
      },
      _ = tokio::signal::ctrl_c(), if !killing => {
        killing = true;
        eprintln!("Killing execution {}", execution.id);
        sender
          .send(ExecutorCause::ExecutionKilled {
            executions: vec![ExecutionKilledExecution {
              execution_id: execution.id.clone(),
              tenant_id: execution.tenant_id.clone(),
              is_on_kill_cascade: true,
            }],
          })
          .await
          .context("runner stopped")?;
      }
    }
  }
}

fn read_inputs_from_stdin() -> Result<serde_json::Map<String, serde_json::Value>> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    // No stdin pipe, no inputs
    return Ok(serde_json::Map::new());
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read inputs from stdin")?;
  parse_inputs(&input)
}

fn parse_inputs(input: &str) -> Result<serde_json::Map<String, serde_json::Value>> {
  if input.trim().is_empty() {
    return Ok(serde_json::Map::new());
  }

  match serde_json::from_str::<serde_json::Value>(input).context("failed to parse inputs JSON from stdin")? {
    serde_json::Value::Object(inputs) => Ok(inputs),
    other => bail!("inputs must be a JSON object, got: {}", other),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  fn flow_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
  }

  #[test]
  fn test_load_valid_flow() {
    let file = flow_file(
      r#"{ "id": "hello", "namespace": "company.team",
           "tasks": [{ "id": "say", "type": "log", "message": "hi" }] }"#,
    );
    let flow = resolved(&load_source(file.path()).unwrap()).unwrap();
    assert_eq!(flow.id, "hello");
  }

  #[test]
  fn test_invalid_flow_is_reported() {
    let file = flow_file(r#"{ "id": "empty", "namespace": "company.team", "tasks": [] }"#);
    let source = load_source(file.path()).unwrap();
    let err = resolved(&source).unwrap_err();
    assert!(err.to_string().contains("company.team.empty"));
  }

  #[test]
  fn test_missing_flow_file() {
    let err = load_source(Path::new("/nonexistent/flow.json")).unwrap_err();
    assert!(err.to_string().contains("failed to read flow file"));
  }

  #[tokio::test]
  async fn test_report_subflow_executions() {
    let file = flow_file(
      r#"{ "id": "child", "namespace": "company.team",
           "tasks": [{ "id": "say", "type": "log", "message": "hi" }] }"#,
    );
    let child = resolved(&load_source(file.path()).unwrap()).unwrap();
    let store = InMemoryExecutionStore::new();
    let execution = Execution::new(None, &child.namespace, &child.id, child.revision, serde_json::Map::new());
    store.create(&execution).await.unwrap();

    assert_eq!(store.list("company.team", "child").await.unwrap().len(), 1);
    report_subflow_executions(&store, &[child]).await.unwrap();
  }

  #[test]
  fn test_parse_inputs() {
    assert!(parse_inputs("  ").unwrap().is_empty());
    assert_eq!(parse_inputs(r#"{ "env": "prod" }"#).unwrap()["env"], "prod");
    assert!(parse_inputs("[1, 2]").is_err());
    assert!(parse_inputs("{ nope").is_err());
  }
}
