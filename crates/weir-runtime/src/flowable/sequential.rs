use weir_config::{SequentialTask, TaskDef};
use weir_execution::{Execution, NextTaskRun, StateType, TaskRun};
use weir_workflow::{GraphCluster, RelationType};

use super::{FlowableTask, inherit_state, resolve_sequential_nexts, resolve_state};
use crate::context::RunContext;
use crate::error::RuntimeError;
use crate::graph::{self, Branches, Scope};
use crate::resolved::{ResolvedTask, resolve_tasks};

/// Runs its tasks one after the other.
pub struct Sequential<'t> {
  task: &'t TaskDef,
  config: &'t SequentialTask,
}

impl<'t> Sequential<'t> {
  pub fn new(task: &'t TaskDef, config: &'t SequentialTask) -> Self {
    Self { task, config }
  }
}

impl FlowableTask for Sequential<'_> {
  fn child_tasks(&self, _ctx: &RunContext, parent: &TaskRun) -> Result<Vec<ResolvedTask<'_>>, RuntimeError> {
    Ok(resolve_tasks(&self.config.tasks, Some(parent)))
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
    let mut cluster = graph::cluster_for(self.task, RelationType::Sequential, parent_values);
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
}
