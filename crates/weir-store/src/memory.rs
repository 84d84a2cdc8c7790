use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use weir_execution::Execution;
use weir_workflow::FlowSource;

use crate::{ExecutionStore, FlowRepository, StoreError};

#[derive(Debug, Clone)]
struct Versioned {
  execution: Execution,
  seq_id: u64,
}

/// Executions kept in memory. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryExecutionStore {
  executions: Arc<RwLock<HashMap<String, Versioned>>>,
}

impl InMemoryExecutionStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
  async fn create(&self, execution: &Execution) -> Result<(), StoreError> {
    let mut executions = self.executions.write().await;
    if executions.contains_key(&execution.id) {
      return Err(StoreError::AlreadyExists(execution.id.clone()));
    }

    executions.insert(
      execution.id.clone(),
      Versioned {
        execution: execution.clone(),
        seq_id: 0,
      },
    );
    Ok(())
  }

  async fn load(&self, execution_id: &str) -> Result<(Execution, u64), StoreError> {
    let executions = self.executions.read().await;
    executions
      .get(execution_id)
      .map(|v| (v.execution.clone(), v.seq_id))
      .ok_or_else(|| StoreError::NotFound(execution_id.to_string()))
  }

  async fn save(&self, execution: &Execution, seq_id: u64) -> Result<(), StoreError> {
    let mut executions = self.executions.write().await;
    let stored = executions.get(&execution.id).map_or(0, |v| v.seq_id);

    if stored + 1 != seq_id {
      debug!(
        execution_id = %execution.id,
        stored,
        attempted = seq_id,
        "rejecting stale execution save"
      );
      return Err(StoreError::VersionConflict {
        execution_id: execution.id.clone(),
        stored,
        attempted: seq_id,
      });
    }

    executions.insert(
      execution.id.clone(),
      Versioned {
        execution: execution.clone(),
        seq_id,
      },
    );
    Ok(())
  }

  async fn list(&self, namespace: &str, flow_id: &str) -> Result<Vec<Execution>, StoreError> {
    let executions = self.executions.read().await;
    Ok(
      executions
        .values()
        .filter(|v| v.execution.namespace == namespace && v.execution.flow_id == flow_id)
        .map(|v| v.execution.clone())
        .collect(),
    )
  }
}

type FlowKey = (Option<String>, String, String);

/// Flow sources kept in memory, by revision.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFlowRepository {
  flows: Arc<RwLock<HashMap<FlowKey, BTreeMap<u32, FlowSource>>>>,
}

impl InMemoryFlowRepository {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a flow source under its own tenant, namespace, id and revision.
  pub async fn insert(&self, source: FlowSource) {
    let key = (
      source.tenant_id().map(str::to_string),
      source.namespace().to_string(),
      source.id().to_string(),
    );
    let mut flows = self.flows.write().await;
    flows.entry(key).or_default().insert(source.revision(), source);
  }
}

#[async_trait]
impl FlowRepository for InMemoryFlowRepository {
  async fn resolve(
    &self,
    tenant_id: Option<&str>,
    namespace: &str,
    flow_id: &str,
    revision: Option<u32>,
  ) -> Result<Option<FlowSource>, StoreError> {
    let key = (
      tenant_id.map(str::to_string),
      namespace.to_string(),
      flow_id.to_string(),
    );
    let flows = self.flows.read().await;
    let Some(revisions) = flows.get(&key) else {
      return Ok(None);
    };

    let source = match revision {
      Some(revision) => revisions.get(&revision),
      None => revisions.values().next_back(),
    };
    Ok(source.cloned())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use weir_config::FlowDef;
  use weir_workflow::{Flow, InvalidFlow};

  fn execution() -> Execution {
    Execution::new(None, "company.team", "flow", 1, serde_json::Map::new())
  }

  fn source(revision: u32) -> FlowSource {
    let def: FlowDef = serde_json::from_value(serde_json::json!({
      "id": "flow", "namespace": "company.team", "revision": revision,
      "tasks": [{ "id": "a", "type": "log", "message": "a" }]
    }))
    .unwrap();
    FlowSource::Resolved(Arc::new(Flow::from_validated(def)))
  }

  #[tokio::test]
  async fn test_create_and_load() {
    let store = InMemoryExecutionStore::new();
    let execution = execution();
    store.create(&execution).await.unwrap();

    let (loaded, seq_id) = store.load(&execution.id).await.unwrap();
    assert_eq!(loaded, execution);
    assert_eq!(seq_id, 0);

    let duplicate = store.create(&execution).await;
    assert!(matches!(duplicate, Err(StoreError::AlreadyExists(_))));
  }

  #[tokio::test]
  async fn test_save_requires_next_sequence() {
    let store = InMemoryExecutionStore::new();
    let execution = execution();
    store.create(&execution).await.unwrap();

    store.save(&execution, 1).await.unwrap();
    store.save(&execution, 2).await.unwrap();

    let stale = store.save(&execution, 2).await;
    assert!(matches!(
      stale,
      Err(StoreError::VersionConflict { stored: 2, attempted: 2, .. })
    ));
    let skipped = store.save(&execution, 4).await;
    assert!(matches!(skipped, Err(StoreError::VersionConflict { .. })));

    assert_eq!(store.load(&execution.id).await.unwrap().1, 2);
  }

  #[tokio::test]
  async fn test_load_missing() {
    let store = InMemoryExecutionStore::new();
    assert!(matches!(store.load("nope").await, Err(StoreError::NotFound(_))));
  }

  #[tokio::test]
  async fn test_list_by_flow() {
    let store = InMemoryExecutionStore::new();
    store.create(&execution()).await.unwrap();
    store.create(&execution()).await.unwrap();
    store
      .create(&Execution::new(None, "company.team", "other", 1, serde_json::Map::new()))
      .await
      .unwrap();

    assert_eq!(store.list("company.team", "flow").await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_resolve_latest_and_pinned_revision() {
    let repository = InMemoryFlowRepository::new();
    repository.insert(source(1)).await;
    repository.insert(source(3)).await;

    let latest = repository.resolve(None, "company.team", "flow", None).await.unwrap();
    assert_eq!(latest.map(|s| s.revision()), Some(3));

    let pinned = repository.resolve(None, "company.team", "flow", Some(1)).await.unwrap();
    assert_eq!(pinned.map(|s| s.revision()), Some(1));

    let missing = repository.resolve(None, "company.team", "flow", Some(2)).await.unwrap();
    assert!(missing.is_none());
  }

  #[tokio::test]
  async fn test_resolve_invalid_flow() {
    let repository = InMemoryFlowRepository::new();
    repository
      .insert(FlowSource::Invalid(InvalidFlow {
        id: "broken".to_string(),
        namespace: "company.team".to_string(),
        tenant_id: Some("acme".to_string()),
        revision: 1,
        error: "no tasks".to_string(),
      }))
      .await;

    let found = repository
      .resolve(Some("acme"), "company.team", "broken", None)
      .await
      .unwrap();
    assert!(matches!(found, Some(FlowSource::Invalid(_))));
    assert!(repository.resolve(None, "company.team", "broken", None).await.unwrap().is_none());
  }
}
