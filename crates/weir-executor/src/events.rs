//! Events that trigger an executor pass, and the requests a pass emits.
//!
//! Producers (workers, timers, child executions, operators) send an
//! [`ExecutorCause`]. A pass answers with worker tasks, delays, subflow
//! requests and kill requests, emitted once the execution is saved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use weir_config::{FlowRef, TaskDef};
use weir_execution::{Execution, ParentTaskRun, StateType, TaskRun};

/// A leaf task run to execute on a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerTask {
  pub task_run: TaskRun,
  pub task: TaskDef,
  /// Variables the task renders its templates against.
  pub variables: serde_json::Value,
}

/// A worker's report for a task run. The run carries its final state and
/// outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerTaskResult {
  pub task_run: TaskRun,
}

/// A trigger evaluation to run on a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerTrigger {
  pub tenant_id: Option<String>,
  pub namespace: String,
  pub flow_id: String,
  pub trigger_id: String,
}

/// Work that can be handed to a worker again after it was lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerJob {
  Task(WorkerTask),
  Trigger(WorkerTrigger),
}

/// Ask the worker running a task run to stop it. The worker answers with a
/// result for the run, killed unless it already finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerKill {
  pub task_run: TaskRun,
}

/// Resume a paused execution at `resume_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionDelay {
  pub execution_id: String,
  pub task_run_id: String,
  pub resume_at: DateTime<Utc>,
}

impl ExecutionDelay {
  pub fn after_ms(execution_id: &str, task_run_id: &str, delay_ms: u64) -> Self {
    let delay = chrono::Duration::milliseconds(i64::try_from(delay_ms).unwrap_or(i64::MAX));
    Self {
      execution_id: execution_id.to_string(),
      task_run_id: task_run_id.to_string(),
      resume_at: Utc::now()
        .checked_add_signed(delay)
        .unwrap_or(DateTime::<Utc>::MAX_UTC),
    }
  }
}

/// Start an execution of another flow on behalf of a task run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubflowExecution {
  /// Id the child execution is created with.
  pub execution_id: String,
  pub parent: ParentTaskRun,
  pub tenant_id: Option<String>,
  pub flow: FlowRef,
  pub inputs: serde_json::Map<String, serde_json::Value>,
}

/// The outcome of a child execution, applied to the task run that started it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubflowExecutionResult {
  pub parent: ParentTaskRun,
  pub state: StateType,
  #[serde(default)]
  pub outputs: serde_json::Map<String, serde_json::Value>,
}

/// A child execution reached a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubflowExecutionEnd {
  pub child_execution_id: String,
  pub parent: ParentTaskRun,
  pub state: StateType,
  #[serde(default)]
  pub outputs: serde_json::Map<String, serde_json::Value>,
}

impl SubflowExecutionEnd {
  /// The end signal of a terminated child execution, if it has a parent.
  pub fn of(child: &Execution) -> Option<Self> {
    let parent = child.parent.clone()?;
    let mut outputs = serde_json::Map::new();
    outputs.insert(
      "executionId".to_string(),
      serde_json::Value::String(child.id.clone()),
    );
    outputs.insert(
      "state".to_string(),
      serde_json::Value::String(child.current().to_string()),
    );

    Some(Self {
      child_execution_id: child.id.clone(),
      parent,
      state: child.current(),
      outputs,
    })
  }

  pub fn into_result(self) -> SubflowExecutionResult {
    SubflowExecutionResult {
      parent: self.parent,
      state: self.state,
      outputs: self.outputs,
    }
  }
}

/// Operator request to resume a paused execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResumed {
  pub execution_id: String,
}

/// Kill request for one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionKilledExecution {
  pub execution_id: String,
  pub tenant_id: Option<String>,
  /// Whether child executions should be killed too.
  pub is_on_kill_cascade: bool,
}

/// The single event an executor pass is triggered by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutorCause {
  /// The execution itself changed, e.g. it was just created.
  Execution {
    execution_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    offset: Option<u64>,
  },
  WorkerTaskResult(WorkerTaskResult),
  SubflowExecutionResult(SubflowExecutionResult),
  SubflowExecutionEnd(SubflowExecutionEnd),
  WorkerJobResubmit(WorkerJob),
  ExecutionResumed(ExecutionResumed),
  ExecutionKilled {
    executions: Vec<ExecutionKilledExecution>,
  },
}

impl ExecutorCause {
  /// The execution this event applies to. A resubmitted trigger belongs to
  /// no execution.
  pub fn execution_id(&self) -> Option<&str> {
    match self {
      Self::Execution { execution_id, .. } => Some(execution_id),
      Self::WorkerTaskResult(result) => Some(&result.task_run.execution_id),
      Self::SubflowExecutionResult(result) => Some(&result.parent.execution_id),
      Self::SubflowExecutionEnd(end) => Some(&end.parent.execution_id),
      Self::WorkerJobResubmit(WorkerJob::Task(task)) => Some(&task.task_run.execution_id),
      Self::WorkerJobResubmit(WorkerJob::Trigger(_)) => None,
      Self::ExecutionResumed(resumed) => Some(&resumed.execution_id),
      Self::ExecutionKilled { executions } => executions.first().map(|k| k.execution_id.as_str()),
    }
  }

  /// Short name of the event, recorded as the provenance of a pass.
  pub fn name(&self) -> &'static str {
    match self {
      Self::Execution { .. } => "execution",
      Self::WorkerTaskResult(_) => "worker_task_result",
      Self::SubflowExecutionResult(_) => "subflow_execution_result",
      Self::SubflowExecutionEnd(_) => "subflow_execution_end",
      Self::WorkerJobResubmit(_) => "worker_job_resubmit",
      Self::ExecutionResumed(_) => "execution_resumed",
      Self::ExecutionKilled { .. } => "execution_killed",
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cause_execution_id() {
    let run = TaskRun::new("exec-1", "a", None, None);
    let cause = ExecutorCause::WorkerTaskResult(WorkerTaskResult { task_run: run });
    assert_eq!(cause.execution_id(), Some("exec-1"));

    let trigger = ExecutorCause::WorkerJobResubmit(WorkerJob::Trigger(WorkerTrigger {
      tenant_id: None,
      namespace: "n".to_string(),
      flow_id: "f".to_string(),
      trigger_id: "t".to_string(),
    }));
    assert_eq!(trigger.execution_id(), None);
    let empty = ExecutorCause::ExecutionKilled { executions: vec![] };
    assert_eq!(empty.execution_id(), None);
  }

  #[test]
  fn test_cause_serialization() {
    let cause = ExecutorCause::Execution {
      execution_id: "exec-1".to_string(),
      offset: Some(42),
    };
    let json = serde_json::to_value(&cause).unwrap();
    assert_eq!(json["type"], "execution");
    assert_eq!(json["offset"], 42);
  }

  #[test]
  fn test_subflow_end_requires_parent() {
    let orphan = Execution::new(None, "n", "child", 1, serde_json::Map::new());
    assert!(SubflowExecutionEnd::of(&orphan).is_none());

    let mut child = orphan.with_parent(ParentTaskRun {
      execution_id: "parent".to_string(),
      task_run_id: "run".to_string(),
    });
    child.transition(StateType::Warning);
    let end = SubflowExecutionEnd::of(&child).unwrap();
    assert_eq!(end.state, StateType::Warning);
    assert_eq!(end.into_result().parent.task_run_id, "run");
  }
}
