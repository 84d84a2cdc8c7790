use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
  #[error("task run not found: {task_run_id}")]
  TaskRunNotFound { task_run_id: String },

  #[error("task run '{task_run_id}' belongs to execution '{actual}', not '{expected}'")]
  ForeignTaskRun {
    task_run_id: String,
    expected: String,
    actual: String,
  },
}
