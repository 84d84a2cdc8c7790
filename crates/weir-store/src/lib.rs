//! Weir Store
//!
//! This crate provides the storage traits the executor persists through, and
//! in-memory implementations of them.
//!
//! The [`ExecutionStore`] trait stores executions with a sequence id used for
//! optimistic concurrency: every save must carry the stored sequence id plus
//! one, otherwise it is rejected with [`StoreError::VersionConflict`] and the
//! caller reloads and retries.
//!
//! The [`FlowRepository`] trait resolves flow references to flow sources,
//! including flows that failed validation.

mod memory;

pub use memory::{InMemoryExecutionStore, InMemoryFlowRepository};

use async_trait::async_trait;
use weir_execution::Execution;
use weir_workflow::FlowSource;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A record with the same id exists already.
  #[error("already exists: {0}")]
  AlreadyExists(String),

  /// The execution was saved by someone else since it was loaded.
  #[error("execution '{execution_id}' is at sequence {stored}, cannot save sequence {attempted}")]
  VersionConflict {
    execution_id: String,
    stored: u64,
    attempted: u64,
  },
}

/// Storage for executions.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
  /// Store a new execution at sequence 0.
  async fn create(&self, execution: &Execution) -> Result<(), StoreError>;

  /// Load an execution with its current sequence id.
  async fn load(&self, execution_id: &str) -> Result<(Execution, u64), StoreError>;

  /// Save an execution at `seq_id`, which must be the stored sequence plus one.
  async fn save(&self, execution: &Execution, seq_id: u64) -> Result<(), StoreError>;

  /// List executions of a flow.
  async fn list(&self, namespace: &str, flow_id: &str) -> Result<Vec<Execution>, StoreError>;
}

/// Lookup of flow definitions by reference.
#[async_trait]
pub trait FlowRepository: Send + Sync {
  /// Resolve a flow. The latest revision is returned when `revision` is `None`.
  async fn resolve(
    &self,
    tenant_id: Option<&str>,
    namespace: &str,
    flow_id: &str,
    revision: Option<u32>,
  ) -> Result<Option<FlowSource>, StoreError>;
}
