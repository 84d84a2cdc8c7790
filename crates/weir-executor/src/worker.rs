//! In-process worker for leaf tasks.
//!
//! The [`LocalWorker`] consumes runner dispatches, executes `log` and `fail`
//! tasks, and reports each run back to the runner as a
//! [`WorkerTaskResult`]. Kill requests are answered with a killed result.

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use weir_config::{LogLevel, TaskKind};
use weir_execution::{Execution, StateType};
use weir_runtime::RunContext;

use crate::dispatch::Dispatch;
use crate::events::{ExecutorCause, WorkerTask, WorkerTaskResult};

/// Output key holding a rendered log or failure message.
pub const MESSAGE_OUTPUT: &str = "message";

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalWorker;

impl LocalWorker {
  pub fn new() -> Self {
    Self
  }

  /// Execute one task run and report its final state.
  pub fn execute(&self, task: &WorkerTask) -> WorkerTaskResult {
    let ctx = RunContext::from_variables(task.variables.clone());
    let run = task.task_run.clone();
    let task_run_id = run.id.as_str();
    let task_id = run.task_id.as_str();

    let (state, outputs) = match &task.task.kind {
      TaskKind::Log(log) => match ctx.render(&log.message) {
        Ok(message) => {
          match log.level {
            LogLevel::Trace => trace!(task_run_id, task_id, "{}", message),
            LogLevel::Debug => debug!(task_run_id, task_id, "{}", message),
            LogLevel::Info => info!(task_run_id, task_id, "{}", message),
            LogLevel::Warn => warn!(task_run_id, task_id, "{}", message),
            LogLevel::Error => error!(task_run_id, task_id, "{}", message),
          }
          (StateType::Success, message_output(message))
        }
        Err(e) => {
          warn!(task_run_id, task_id, error = %e, "failed to render log message");
          (StateType::Failed, message_output(e.to_string()))
        }
      },

      TaskKind::Fail(fail) => {
        let message = match &fail.message {
          Some(template) => ctx.render(template).unwrap_or_else(|e| e.to_string()),
          None => "task failed".to_string(),
        };
        info!(task_run_id, task_id, %message, "failing task");
        (StateType::Failed, message_output(message))
      }

      other => {
        warn!(task_run_id, task_id, kind = ?other, "task cannot run on a worker");
        (StateType::Failed, Map::new())
      }
    };

    WorkerTaskResult {
      task_run: run.with_outputs(outputs).with_state(state),
    }
  }

  /// Consume dispatches until cancelled or the dispatch channel closes.
  ///
  /// Saved executions are forwarded to `updates` when given.
  pub async fn run(
    self,
    mut dispatches: mpsc::UnboundedReceiver<Dispatch>,
    results: mpsc::Sender<ExecutorCause>,
    updates: Option<mpsc::UnboundedSender<Execution>>,
    cancel: CancellationToken,
  ) {
    loop {
      let dispatch = tokio::select! {
        _ = cancel.cancelled() => break,
        dispatch = dispatches.recv() => match dispatch {
          Some(dispatch) => dispatch,
          None => break,
        },
      };

      let result = match dispatch {
        Dispatch::WorkerTask(task) => self.execute(&task),
        Dispatch::WorkerKill(kill) => {
          debug!(task_run_id = %kill.task_run.id, "killing task run");
          WorkerTaskResult {
            task_run: kill.task_run.with_state(StateType::Killed),
          }
        }
        Dispatch::ExecutionUpdated(execution) => {
          if let Some(updates) = &updates {
            // The listener may be gone.
            let _ = updates.send(execution);
          }
          continue;
        }
        Dispatch::WorkerTrigger(trigger) => {
          debug!(trigger_id = %trigger.trigger_id, "no trigger support in the local worker");
          continue;
        }
        Dispatch::ExecutionDelay(_) => continue,
      };

      if results
        .send(ExecutorCause::WorkerTaskResult(result))
        .await
        .is_err()
      {
        debug!("runner channel closed, stopping worker");
        break;
      }
    }
  }
}

fn message_output(message: String) -> Map<String, Value> {
  let mut outputs = Map::new();
  outputs.insert(MESSAGE_OUTPUT.to_string(), Value::String(message));
  outputs
}
