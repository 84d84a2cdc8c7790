//! Executor error types.

use weir_execution::ExecutionError;
use weir_runtime::RuntimeError;
use weir_store::StoreError;
use weir_workflow::WorkflowError;

/// Errors raised while joining events, advancing executions or persisting them.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
  #[error(transparent)]
  Runtime(#[from] RuntimeError),

  #[error(transparent)]
  Execution(#[from] ExecutionError),

  #[error(transparent)]
  Workflow(#[from] WorkflowError),

  #[error(transparent)]
  Store(#[from] StoreError),

  /// The flow an execution refers to is not in the repository.
  #[error("flow '{namespace}.{flow_id}' not found")]
  FlowNotFound { namespace: String, flow_id: String },

  /// The flow an execution refers to failed validation.
  #[error("flow '{namespace}.{flow_id}' is invalid: {message}")]
  InvalidFlow {
    namespace: String,
    flow_id: String,
    message: String,
  },

  /// The execution kept being saved by someone else.
  #[error("execution '{execution_id}' still conflicting after {attempts} attempts")]
  ConflictRetriesExhausted { execution_id: String, attempts: u32 },

  /// The runner channel was closed.
  #[error("executor runner channel closed")]
  ChannelClosed,
}
