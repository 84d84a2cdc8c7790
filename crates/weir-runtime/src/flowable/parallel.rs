use weir_config::{ParallelTask, TaskDef};
use weir_execution::{Execution, NextTaskRun, StateType, TaskRun};
use weir_workflow::{GraphCluster, RelationType};

use super::{FlowableTask, inherit_state, resolve_parallel_nexts, resolve_state};
use crate::context::RunContext;
use crate::error::RuntimeError;
use crate::graph::{self, Branches, Scope};
use crate::resolved::{ResolvedTask, resolve_tasks};

/// Runs its tasks at the same time, at most `concurrency` at once.
pub struct Parallel<'t> {
  task: &'t TaskDef,
  config: &'t ParallelTask,
}

impl<'t> Parallel<'t> {
  pub fn new(task: &'t TaskDef, config: &'t ParallelTask) -> Self {
    Self { task, config }
  }
}

impl FlowableTask for Parallel<'_> {
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

    Ok(resolve_parallel_nexts(
      execution,
      &children,
      &resolve_tasks(&self.config.errors, Some(parent)),
      &resolve_tasks(&self.config.finally, Some(parent)),
      self.config.concurrency.map(|c| c as usize),
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
    let mut cluster = graph::cluster_for(self.task, RelationType::Parallel, parent_values);
    graph::parallel(
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
