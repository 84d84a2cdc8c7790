use serde::{Deserialize, Serialize};

use crate::state::{State, StateType};

/// One task's run instance within an execution.
///
/// A task inside a loop gets one run per loop value; `value` holds the
/// iteration value and children inherit it from their parent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
  pub id: String,
  pub execution_id: String,
  pub task_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub parent_task_run_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub value: Option<String>,
  #[serde(default)]
  pub outputs: serde_json::Map<String, serde_json::Value>,
  pub state: State,
}

impl TaskRun {
  pub fn new(
    execution_id: impl Into<String>,
    task_id: impl Into<String>,
    parent_task_run_id: Option<String>,
    value: Option<String>,
  ) -> Self {
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      execution_id: execution_id.into(),
      task_id: task_id.into(),
      parent_task_run_id,
      value,
      outputs: serde_json::Map::new(),
      state: State::new(),
    }
  }

  pub fn with_state(mut self, state: StateType) -> Self {
    self.state.transition(state);
    self
  }

  /// Merge outputs into the existing ones. Keys already present are kept.
  pub fn with_outputs(mut self, outputs: serde_json::Map<String, serde_json::Value>) -> Self {
    for (key, value) in outputs {
      self.outputs.entry(key).or_insert(value);
    }
    self
  }

  pub fn current(&self) -> StateType {
    self.state.current()
  }

  /// Whether this run instantiates `task_id` under `parent` for `value`.
  pub fn is_instance_of(&self, task_id: &str, parent: Option<&str>, value: Option<&str>) -> bool {
    self.task_id == task_id
      && self.parent_task_run_id.as_deref() == parent
      && self.value.as_deref() == value
  }
}
