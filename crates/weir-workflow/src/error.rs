use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
  #[error("failed to parse flow definition: {0}")]
  Parse(#[from] serde_json::Error),

  #[error("flow '{namespace}.{flow_id}' has no tasks")]
  NoTasks { namespace: String, flow_id: String },

  #[error("task id '{0}' is used more than once")]
  DuplicateTaskId(String),

  #[error("task id must not be empty")]
  EmptyTaskId,

  #[error("task '{task_id}' is invalid: {message}")]
  InvalidTask { task_id: String, message: String },
}
