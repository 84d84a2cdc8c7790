use serde::{Deserialize, Serialize};

use crate::error::ExecutionError;
use crate::state::{State, StateType};
use crate::task_run::TaskRun;

/// The task run of another execution that started this one as a subflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentTaskRun {
  pub execution_id: String,
  pub task_run_id: String,
}

/// One run of a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
  pub id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tenant_id: Option<String>,
  pub namespace: String,
  pub flow_id: String,
  pub flow_revision: u32,
  #[serde(default)]
  pub inputs: serde_json::Map<String, serde_json::Value>,
  /// Task runs in creation order.
  #[serde(default)]
  pub task_runs: Vec<TaskRun>,
  pub state: State,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub parent: Option<ParentTaskRun>,
  /// Soft-deleted executions are kept but never advanced.
  #[serde(default)]
  pub deleted: bool,
}

/// A task run to append to the execution, created by a flowable parent or by
/// the root of the flow.
#[derive(Debug, Clone, PartialEq)]
pub struct NextTaskRun {
  pub task_run: TaskRun,
}

impl Execution {
  pub fn new(
    tenant_id: Option<String>,
    namespace: impl Into<String>,
    flow_id: impl Into<String>,
    flow_revision: u32,
    inputs: serde_json::Map<String, serde_json::Value>,
  ) -> Self {
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      tenant_id,
      namespace: namespace.into(),
      flow_id: flow_id.into(),
      flow_revision,
      inputs,
      task_runs: Vec::new(),
      state: State::new(),
      parent: None,
      deleted: false,
    }
  }

  pub fn with_parent(mut self, parent: ParentTaskRun) -> Self {
    self.parent = Some(parent);
    self
  }

  pub fn current(&self) -> StateType {
    self.state.current()
  }

  pub fn is_paused(&self) -> bool {
    self.state.is_paused()
  }

  pub fn is_terminal(&self) -> bool {
    self.state.is_terminal()
  }

  pub fn find_task_run(&self, task_run_id: &str) -> Option<&TaskRun> {
    self.task_runs.iter().find(|r| r.id == task_run_id)
  }

  pub fn task_run(&self, task_run_id: &str) -> Result<&TaskRun, ExecutionError> {
    self
      .find_task_run(task_run_id)
      .ok_or_else(|| ExecutionError::TaskRunNotFound {
        task_run_id: task_run_id.to_string(),
      })
  }

  /// Find the run of `task_id` created under `parent` for `value`.
  pub fn find_instance(
    &self,
    task_id: &str,
    parent: Option<&str>,
    value: Option<&str>,
  ) -> Option<&TaskRun> {
    self
      .task_runs
      .iter()
      .find(|r| r.is_instance_of(task_id, parent, value))
  }

  /// Insert a run, or replace the run with the same id in place.
  pub fn upsert_task_run(&mut self, task_run: TaskRun) {
    match self.task_runs.iter_mut().find(|r| r.id == task_run.id) {
      Some(existing) => *existing = task_run,
      None => self.task_runs.push(task_run),
    }
  }

  /// Replace an existing run with an update reported from outside the
  /// executor (a worker or a subflow).
  ///
  /// Returns `Ok(false)` without touching anything when the stored run is
  /// already terminal: results are delivered at least once and replays must
  /// not change a finalized run.
  pub fn merge_task_run(&mut self, task_run: TaskRun) -> Result<bool, ExecutionError> {
    if task_run.execution_id != self.id {
      return Err(ExecutionError::ForeignTaskRun {
        task_run_id: task_run.id,
        expected: self.id.clone(),
        actual: task_run.execution_id,
      });
    }

    let existing = self
      .task_runs
      .iter_mut()
      .find(|r| r.id == task_run.id)
      .ok_or_else(|| ExecutionError::TaskRunNotFound {
        task_run_id: task_run.id.clone(),
      })?;

    if existing.state.is_terminal() {
      return Ok(false);
    }

    *existing = task_run;
    Ok(true)
  }

  pub fn transition(&mut self, state: StateType) {
    self.state.transition(state);
  }

  /// Whether any task run has not reached a terminal state.
  pub fn has_pending_task_runs(&self) -> bool {
    self.task_runs.iter().any(|r| !r.state.is_terminal())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn execution() -> Execution {
    Execution::new(None, "company.team", "flow", 1, serde_json::Map::new())
  }

  #[test]
  fn test_upsert_replaces_in_place() {
    let mut execution = execution();
    let a = TaskRun::new(&execution.id, "a", None, None);
    let b = TaskRun::new(&execution.id, "b", None, None);
    execution.upsert_task_run(a.clone());
    execution.upsert_task_run(b.clone());

    execution.upsert_task_run(a.clone().with_state(StateType::Running));

    assert_eq!(execution.task_runs.len(), 2);
    assert_eq!(execution.task_runs[0].id, a.id);
    assert_eq!(execution.task_runs[0].current(), StateType::Running);
    assert_eq!(execution.task_runs[1].id, b.id);
  }

  #[test]
  fn test_merge_ignores_terminal_run() {
    let mut execution = execution();
    let run = TaskRun::new(&execution.id, "a", None, None).with_state(StateType::Success);
    execution.upsert_task_run(run.clone());

    let replay = run.clone().with_state(StateType::Failed);
    let merged = execution.merge_task_run(replay).unwrap();

    assert!(!merged);
    assert_eq!(execution.task_runs[0].current(), StateType::Success);
  }

  #[test]
  fn test_merge_rejects_foreign_run() {
    let mut execution = execution();
    let run = TaskRun::new("other-execution", "a", None, None);

    let result = execution.merge_task_run(run);
    assert!(matches!(result, Err(ExecutionError::ForeignTaskRun { .. })));
  }

  #[test]
  fn test_merge_unknown_run() {
    let mut execution = execution();
    let run = TaskRun::new(&execution.id, "a", None, None);

    let result = execution.merge_task_run(run);
    assert!(matches!(result, Err(ExecutionError::TaskRunNotFound { .. })));
  }

  #[test]
  fn test_pending_task_runs() {
    let mut execution = execution();
    let parent = TaskRun::new(&execution.id, "seq", None, None);
    let child = TaskRun::new(&execution.id, "a", Some(parent.id.clone()), None);
    execution.upsert_task_run(parent.clone());
    execution.upsert_task_run(child.clone());
    assert!(execution.has_pending_task_runs());

    execution.upsert_task_run(parent.with_state(StateType::Success));
    execution.upsert_task_run(child.with_state(StateType::Success));
    assert!(!execution.has_pending_task_runs());
  }
}
