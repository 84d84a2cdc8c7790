use weir_config::TaskDef;
use weir_execution::{Execution, NextTaskRun, TaskRun};

/// A task definition bound to the runtime context it runs in: the parent run
/// and the loop value.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTask<'a> {
  pub task: &'a TaskDef,
  pub value: Option<String>,
  pub parent_task_run_id: Option<String>,
}

impl<'a> ResolvedTask<'a> {
  /// Bind a task under `parent`, inheriting the parent's loop value.
  pub fn of(task: &'a TaskDef, parent: Option<&TaskRun>) -> Self {
    Self {
      task,
      value: parent.and_then(|p| p.value.clone()),
      parent_task_run_id: parent.map(|p| p.id.clone()),
    }
  }

  /// Bind a task under `parent` for an explicit loop value.
  pub fn with_value(task: &'a TaskDef, parent: &TaskRun, value: String) -> Self {
    Self {
      task,
      value: Some(value),
      parent_task_run_id: Some(parent.id.clone()),
    }
  }

  /// The run instantiating this task, if it was created already.
  pub fn find_run<'e>(&self, execution: &'e Execution) -> Option<&'e TaskRun> {
    execution.find_instance(
      &self.task.id,
      self.parent_task_run_id.as_deref(),
      self.value.as_deref(),
    )
  }

  pub fn to_next_task_run(&self, execution: &Execution) -> NextTaskRun {
    NextTaskRun {
      task_run: TaskRun::new(
        &execution.id,
        &self.task.id,
        self.parent_task_run_id.clone(),
        self.value.clone(),
      ),
    }
  }
}

/// Bind every enabled task of a list under `parent`.
pub fn resolve_tasks<'a>(tasks: &'a [TaskDef], parent: Option<&TaskRun>) -> Vec<ResolvedTask<'a>> {
  tasks
    .iter()
    .filter(|t| !t.disabled)
    .map(|t| ResolvedTask::of(t, parent))
    .collect()
}
