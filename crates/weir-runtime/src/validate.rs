//! Flow validation.
//!
//! Validation walks every branch through [`crate::FlowableTask::all_child_tasks`],
//! so branches that a run may never choose are still checked.

use std::collections::HashSet;
use std::sync::Arc;

use weir_config::{FlowDef, TaskDef, TaskKind};
use weir_workflow::{Flow, FlowSource, InvalidFlow, WorkflowError};

use crate::flowable::flowable;

/// Validate a definition into a flow the executor can advance.
pub fn resolve_flow(def: FlowDef) -> Result<Flow, WorkflowError> {
  if def.tasks.is_empty() {
    return Err(WorkflowError::NoTasks {
      namespace: def.namespace,
      flow_id: def.id,
    });
  }

  let mut task_ids = HashSet::new();
  for task in def.tasks.iter().chain(&def.errors).chain(&def.finally) {
    validate_task(task, &mut task_ids)?;
  }

  Ok(Flow::from_validated(def))
}

/// Validate a definition, keeping a failure as an invalid flow.
pub fn resolve_source(def: FlowDef) -> FlowSource {
  let (id, namespace, tenant_id, revision) =
    (def.id.clone(), def.namespace.clone(), def.tenant_id.clone(), def.revision);

  match resolve_flow(def) {
    Ok(flow) => FlowSource::Resolved(Arc::new(flow)),
    Err(e) => FlowSource::Invalid(InvalidFlow {
      id,
      namespace,
      tenant_id,
      revision,
      error: e.to_string(),
    }),
  }
}

/// Parse and validate a JSON flow definition.
///
/// A definition that does not parse is still returned as an invalid flow,
/// identified by whatever `id`, `namespace` and `revision` could be read.
pub fn parse_flow(source: &str) -> FlowSource {
  let raw: serde_json::Value = match serde_json::from_str(source) {
    Ok(raw) => raw,
    Err(e) => return invalid(&serde_json::Value::Null, WorkflowError::Parse(e)),
  };

  match serde_json::from_value::<FlowDef>(raw.clone()) {
    Ok(def) => resolve_source(def),
    Err(e) => invalid(&raw, WorkflowError::Parse(e)),
  }
}

fn invalid(raw: &serde_json::Value, error: WorkflowError) -> FlowSource {
  let field = |name: &str| raw.get(name).and_then(|v| v.as_str()).map(str::to_string);

  FlowSource::Invalid(InvalidFlow {
    id: field("id").unwrap_or_default(),
    namespace: field("namespace").unwrap_or_default(),
    tenant_id: field("tenant_id"),
    revision: raw
      .get("revision")
      .and_then(|v| v.as_u64())
      .and_then(|r| u32::try_from(r).ok())
      .unwrap_or(1),
    error: error.to_string(),
  })
}

fn validate_task(task: &TaskDef, task_ids: &mut HashSet<String>) -> Result<(), WorkflowError> {
  if task.id.trim().is_empty() {
    return Err(WorkflowError::EmptyTaskId);
  }
  if !task_ids.insert(task.id.clone()) {
    return Err(WorkflowError::DuplicateTaskId(task.id.clone()));
  }

  let reject = |message: &str| WorkflowError::InvalidTask {
    task_id: task.id.clone(),
    message: message.to_string(),
  };

  match &task.kind {
    TaskKind::If(config) if config.then.is_empty() => return Err(reject("'then' must not be empty")),
    TaskKind::Sequential(config) if config.tasks.is_empty() => return Err(reject("'tasks' must not be empty")),
    TaskKind::Parallel(config) if config.tasks.is_empty() => return Err(reject("'tasks' must not be empty")),
    TaskKind::Parallel(config) if config.concurrency == Some(0) => {
      return Err(reject("'concurrency' must be at least 1"));
    }
    TaskKind::ForEach(config) if config.tasks.is_empty() => return Err(reject("'tasks' must not be empty")),
    TaskKind::Subflow(config) if config.flow.namespace.is_empty() || config.flow.flow_id.is_empty() => {
      return Err(reject("subflow reference needs a namespace and a flow id"));
    }
    _ => {}
  }

  if let Some(composite) = flowable(task) {
    for child in composite.all_child_tasks() {
      validate_task(child, task_ids)?;
    }
  }
  Ok(())
}
