use serde_json::{Map, Value};
use tracing::debug;
use weir_config::{IfTask, TaskDef};
use weir_execution::{Execution, NextTaskRun, StateType, TaskRun};
use weir_workflow::{GraphCluster, RelationType};

use super::{FlowableTask, inherit_state, resolve_sequential_nexts, resolve_state};
use crate::context::RunContext;
use crate::error::RuntimeError;
use crate::graph::{self, Branches, Scope};
use crate::resolved::{ResolvedTask, resolve_tasks};
use crate::truth::is_truthy;

/// Output key holding the evaluated condition of an `if` run.
pub const EVALUATION_RESULT: &str = "evaluationResult";

/// Runs `then` when the condition is truthy, `else` otherwise.
///
/// The condition is evaluated once, when the run starts, and stored in the
/// run's outputs. Later evaluations read it back so the chosen branch never
/// changes mid-run, even if the variables it depends on do.
pub struct If<'t> {
  task: &'t TaskDef,
  config: &'t IfTask,
}

impl<'t> If<'t> {
  pub fn new(task: &'t TaskDef, config: &'t IfTask) -> Self {
    Self { task, config }
  }

  fn evaluate(&self, ctx: &RunContext) -> Result<bool, RuntimeError> {
    let rendered = ctx.render(&self.config.condition)?;
    let result = is_truthy(Some(&rendered));
    debug!(task_id = %self.task.id, %rendered, result, "evaluated condition");
    Ok(result)
  }

  fn evaluation_result(&self, ctx: &RunContext, parent: &TaskRun) -> Result<bool, RuntimeError> {
    match parent.outputs.get(EVALUATION_RESULT).and_then(Value::as_bool) {
      Some(result) => Ok(result),
      None => self.evaluate(ctx),
    }
  }

  fn branches<'a>(&'a self, parent: &TaskRun) -> (Vec<ResolvedTask<'a>>, Vec<ResolvedTask<'a>>) {
    (
      resolve_tasks(&self.config.errors, Some(parent)),
      resolve_tasks(&self.config.finally, Some(parent)),
    )
  }
}

impl FlowableTask for If<'_> {
  fn child_tasks(&self, ctx: &RunContext, parent: &TaskRun) -> Result<Vec<ResolvedTask<'_>>, RuntimeError> {
    let branch = if self.evaluation_result(ctx, parent)? {
      &self.config.then
    } else {
      &self.config.else_tasks
    };
    Ok(resolve_tasks(branch, Some(parent)))
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
    let (errors, finally) = self.branches(parent);
    Ok(resolve_sequential_nexts(execution, &children, &errors, &finally))
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
    let (errors, finally) = self.branches(parent);
    Ok(resolve_state(ctx, execution, &children, &errors, &finally))
  }

  fn tasks_tree(
    &self,
    execution: Option<&Execution>,
    task_run: Option<&TaskRun>,
    parent_values: &[String],
  ) -> GraphCluster {
    let mut cluster = graph::cluster_for(self.task, RelationType::Choice, parent_values);
    graph::if_else(
      &mut cluster,
      &self.config.then,
      &self.config.else_tasks,
      Branches {
        tasks: &[],
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
      .then
      .iter()
      .chain(&self.config.else_tasks)
      .chain(&self.config.errors)
      .chain(&self.config.finally)
      .collect()
  }

  fn outputs(&self, ctx: &RunContext) -> Result<Map<String, Value>, RuntimeError> {
    let mut outputs = Map::new();
    outputs.insert(EVALUATION_RESULT.to_string(), Value::Bool(self.evaluate(ctx)?));
    Ok(outputs)
  }
}
