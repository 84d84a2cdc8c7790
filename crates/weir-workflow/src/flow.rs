use std::sync::Arc;

use serde::{Deserialize, Serialize};
use weir_config::{FlowDef, TaskDef};

/// A validated flow ready for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
  pub id: String,
  pub namespace: String,
  pub tenant_id: Option<String>,
  pub revision: u32,
  pub inputs: serde_json::Map<String, serde_json::Value>,
  pub tasks: Vec<TaskDef>,
  pub errors: Vec<TaskDef>,
  pub finally: Vec<TaskDef>,
}

impl Flow {
  /// Build a flow from a definition that has already been validated.
  pub fn from_validated(def: FlowDef) -> Self {
    Self {
      id: def.id,
      namespace: def.namespace,
      tenant_id: def.tenant_id,
      revision: def.revision,
      inputs: def.inputs,
      tasks: def.tasks,
      errors: def.errors,
      finally: def.finally,
    }
  }

  /// Find a task by id anywhere in the flow, including nested branches.
  pub fn find_task(&self, task_id: &str) -> Option<&TaskDef> {
    fn find<'a>(tasks: &'a [TaskDef], task_id: &str) -> Option<&'a TaskDef> {
      for task in tasks {
        if task.id == task_id {
          return Some(task);
        }
        if let Some(found) = nested(task).into_iter().find_map(|b| find(b, task_id)) {
          return Some(found);
        }
      }
      None
    }

    find(&self.tasks, task_id)
      .or_else(|| find(&self.errors, task_id))
      .or_else(|| find(&self.finally, task_id))
  }

  /// Merge execution inputs over the flow's default inputs.
  pub fn merge_inputs(
    &self,
    inputs: serde_json::Map<String, serde_json::Value>,
  ) -> serde_json::Map<String, serde_json::Value> {
    let mut merged = self.inputs.clone();
    merged.extend(inputs);
    merged
  }
}

/// Branches nested directly under a task.
fn nested(task: &TaskDef) -> Vec<&[TaskDef]> {
  use weir_config::TaskKind;

  match &task.kind {
    TaskKind::If(t) => vec![&t.then[..], &t.else_tasks, &t.errors, &t.finally],
    TaskKind::Sequential(t) => vec![&t.tasks[..], &t.errors, &t.finally],
    TaskKind::Parallel(t) => vec![&t.tasks[..], &t.errors, &t.finally],
    TaskKind::ForEach(t) => vec![&t.tasks[..], &t.errors, &t.finally],
    TaskKind::Log(_) | TaskKind::Fail(_) | TaskKind::Pause(_) | TaskKind::Subflow(_) => vec![],
  }
}

/// A flow definition that could not be parsed or validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidFlow {
  pub id: String,
  pub namespace: String,
  pub tenant_id: Option<String>,
  pub revision: u32,
  pub error: String,
}

/// What the flow resolver returns for a flow reference.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowSource {
  Resolved(Arc<Flow>),
  /// Executions of an invalid flow are never advanced.
  Invalid(InvalidFlow),
}

impl FlowSource {
  pub fn id(&self) -> &str {
    match self {
      Self::Resolved(flow) => &flow.id,
      Self::Invalid(invalid) => &invalid.id,
    }
  }

  pub fn namespace(&self) -> &str {
    match self {
      Self::Resolved(flow) => &flow.namespace,
      Self::Invalid(invalid) => &invalid.namespace,
    }
  }

  pub fn tenant_id(&self) -> Option<&str> {
    match self {
      Self::Resolved(flow) => flow.tenant_id.as_deref(),
      Self::Invalid(invalid) => invalid.tenant_id.as_deref(),
    }
  }

  pub fn revision(&self) -> u32 {
    match self {
      Self::Resolved(flow) => flow.revision,
      Self::Invalid(invalid) => invalid.revision,
    }
  }

  pub fn flow(&self) -> Option<&Arc<Flow>> {
    match self {
      Self::Resolved(flow) => Some(flow),
      Self::Invalid(_) => None,
    }
  }
}
