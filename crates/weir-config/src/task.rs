use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::expression::Expression;
use crate::flow_ref::FlowRef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDef {
  pub id: String,
  #[serde(flatten)]
  pub kind: TaskKind,
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub disabled: bool,
  /// A failure of this task (or of its children) is reported as a warning.
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub allow_failure: bool,
  /// A warning of this task (or of its children) is reported as a success.
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub allow_warning: bool,
}

impl TaskDef {
  /// Whether this task orchestrates children instead of doing leaf work.
  pub fn is_flowable(&self) -> bool {
    matches!(
      self.kind,
      TaskKind::If(_) | TaskKind::Sequential(_) | TaskKind::Parallel(_) | TaskKind::ForEach(_)
    )
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
  /// Render a message and write it to the task log.
  Log(LogTask),
  /// Fail unconditionally. Useful to exercise error branches.
  Fail(FailTask),
  /// Pause the execution until it is resumed, or until the delay elapses.
  Pause(PauseTask),
  /// Choose between two task lists depending on a condition.
  If(IfTask),
  /// Run tasks one after the other.
  Sequential(SequentialTask),
  /// Run tasks at the same time.
  Parallel(ParallelTask),
  /// Run tasks once per value of a rendered list.
  ForEach(ForEachTask),
  /// Start an execution of another flow.
  Subflow(SubflowTask),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
  Trace,
  Debug,
  #[default]
  Info,
  Warn,
  Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogTask {
  pub message: Expression,
  #[serde(default)]
  pub level: LogLevel,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailTask {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message: Option<Expression>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PauseTask {
  /// Resume automatically after this many milliseconds.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub delay_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfTask {
  /// Rendered, then coerced to a boolean. `0`, `-0`, `false`, null and the
  /// empty string are false, every other value is true.
  pub condition: Expression,
  pub then: Vec<TaskDef>,
  #[serde(rename = "else", default, skip_serializing_if = "Vec::is_empty")]
  pub else_tasks: Vec<TaskDef>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub errors: Vec<TaskDef>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub finally: Vec<TaskDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequentialTask {
  pub tasks: Vec<TaskDef>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub errors: Vec<TaskDef>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub finally: Vec<TaskDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelTask {
  pub tasks: Vec<TaskDef>,
  /// Maximum number of children running at once. Unlimited when absent.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub concurrency: Option<u32>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub errors: Vec<TaskDef>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub finally: Vec<TaskDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForEachTask {
  /// Must render to a JSON array.
  pub values: Expression,
  pub tasks: Vec<TaskDef>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub errors: Vec<TaskDef>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub finally: Vec<TaskDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubflowTask {
  pub flow: FlowRef,
  #[serde(default)]
  pub inputs: HashMap<String, Expression>,
  /// Wait for the subflow to end before completing this task.
  #[serde(default = "default_wait")]
  pub wait: bool,
}

fn default_wait() -> bool {
  true
}
