//! Runtime error types.

use weir_execution::ExecutionError;

/// Errors raised while evaluating flowable tasks.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
  /// A template could not be rendered (syntax error, undefined variable).
  #[error("failed to render '{template}': {message}")]
  VariableEvaluation { template: String, message: String },

  /// A task run references a task the flow does not define.
  #[error("task '{task_id}' not found in flow")]
  TaskNotFound { task_id: String },

  /// A rendered value has the wrong shape.
  #[error("invalid value for task '{task_id}': {message}")]
  InvalidValue { task_id: String, message: String },

  #[error(transparent)]
  Execution(#[from] ExecutionError),
}
