use serde_json::{Map, Value};
use tracing::debug;
use weir_config::{ForEachTask, TaskDef};
use weir_execution::{Execution, NextTaskRun, StateType, TaskRun};
use weir_workflow::{GraphCluster, RelationType};

use super::{FlowableTask, inherit_state, resolve_sequential_nexts, resolve_state};
use crate::context::RunContext;
use crate::error::RuntimeError;
use crate::graph::{self, Branches, Scope};
use crate::resolved::{ResolvedTask, resolve_tasks};

/// Output key holding the rendered values of a `for_each` run.
pub const FOR_EACH_VALUES: &str = "values";

/// Runs its tasks once per value, one value after the other.
///
/// Values are rendered when the run starts and stored in its outputs. Each
/// child run carries its value, visible to templates as `taskrun.value`.
/// Repeated values collapse into one iteration.
pub struct ForEach<'t> {
  task: &'t TaskDef,
  config: &'t ForEachTask,
}

impl<'t> ForEach<'t> {
  pub fn new(task: &'t TaskDef, config: &'t ForEachTask) -> Self {
    Self { task, config }
  }

  fn render(&self, ctx: &RunContext) -> Result<Vec<Value>, RuntimeError> {
    match ctx.render_json(&self.task.id, &self.config.values)? {
      Value::Array(values) => {
        debug!(task_id = %self.task.id, count = values.len(), "rendered loop values");
        Ok(values)
      }
      other => Err(RuntimeError::InvalidValue {
        task_id: self.task.id.clone(),
        message: format!("values must render to a JSON array, got {}", other),
      }),
    }
  }

  fn values(&self, ctx: &RunContext, parent: &TaskRun) -> Result<Vec<String>, RuntimeError> {
    let raw = match parent.outputs.get(FOR_EACH_VALUES) {
      Some(Value::Array(values)) => values.clone(),
      _ => self.render(ctx)?,
    };

    let mut values: Vec<String> = Vec::with_capacity(raw.len());
    for value in raw {
      let value = match value {
        Value::String(s) => s,
        other => other.to_string(),
      };
      if !values.contains(&value) {
        values.push(value);
      }
    }
    Ok(values)
  }
}

impl FlowableTask for ForEach<'_> {
  fn child_tasks(&self, ctx: &RunContext, parent: &TaskRun) -> Result<Vec<ResolvedTask<'_>>, RuntimeError> {
    let values = self.values(ctx, parent)?;
    let tasks: Vec<&TaskDef> = self.config.tasks.iter().filter(|t| !t.disabled).collect();

    Ok(
      values
        .into_iter()
        .flat_map(|value| {
          tasks
            .iter()
            .map(move |task| ResolvedTask::with_value(*task, parent, value.clone()))
        })
        .collect(),
    )
  }

  fn resolve_nexts(
    &self,
    ctx: &RunContext,
    execution: &Execution,
    parent: &TaskRun,
  ) -> Result<Vec<NextTaskRun>, RuntimeError> {
    let children = self.child_tasks(ctx, parent)?;
    if children.is_empty() {
      return Ok(vec![]);
    }

    Ok(resolve_sequential_nexts(
      execution,
      &children,
      &resolve_tasks(&self.config.errors, Some(parent)),
      &resolve_tasks(&self.config.finally, Some(parent)),
    ))
  }

  fn resolve_state(
    &self,
    ctx: &RunContext,
    execution: &Execution,
    parent: &TaskRun,
  ) -> Result<Option<StateType>, RuntimeError> {
    let children = self.child_tasks(ctx, parent)?;
    if children.is_empty() {
      return Ok(Some(inherit_state(parent, ctx.policy())));
    }

    let errors = resolve_tasks(&self.config.errors, Some(parent));
    let finally = resolve_tasks(&self.config.finally, Some(parent));
    Ok(resolve_state(ctx, execution, &children, &errors, &finally))
  }

  fn tasks_tree(
    &self,
    execution: Option<&Execution>,
    task_run: Option<&TaskRun>,
    parent_values: &[String],
  ) -> GraphCluster {
    let mut cluster = graph::cluster_for(self.task, RelationType::Dynamic, parent_values);
    graph::sequential(
      &mut cluster,
      Branches {
        tasks: &self.config.tasks,
        errors: &self.config.errors,
        finally: &self.config.finally,
      },
      Scope {
        execution,
        parent_run: task_run,
        parent_values,
      },
    );
    cluster
  }

  fn all_child_tasks(&self) -> Vec<&TaskDef> {
    self
      .config
      .tasks
      .iter()
      .chain(&self.config.errors)
      .chain(&self.config.finally)
      .collect()
  }

  fn outputs(&self, ctx: &RunContext) -> Result<Map<String, Value>, RuntimeError> {
    let mut outputs = Map::new();
    outputs.insert(FOR_EACH_VALUES.to_string(), Value::Array(self.render(ctx)?));
    Ok(outputs)
  }
}
