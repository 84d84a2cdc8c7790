//! Shared harness: a runner and a local worker wired over in-memory storage.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::Map;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use weir_config::FlowDef;
use weir_execution::{Execution, StateType, TaskRun};
use weir_executor::{ChannelDispatcher, ExecutorCause, ExecutorRunner, LocalWorker};
use weir_runtime::resolve_source;
use weir_store::{ExecutionStore, InMemoryExecutionStore, InMemoryFlowRepository};

const WAIT: Duration = Duration::from_secs(5);

pub struct Harness {
  pub store: Arc<dyn ExecutionStore>,
  pub sender: mpsc::Sender<ExecutorCause>,
  updates: mpsc::UnboundedReceiver<Execution>,
  cancel: CancellationToken,
}

impl Harness {
  /// Register `flows` and start a runner and a worker over `store`.
  pub async fn start_with_store(store: Arc<dyn ExecutionStore>, flows: &[serde_json::Value]) -> Self {
    let repository = InMemoryFlowRepository::new();
    for flow in flows {
      let def: FlowDef = serde_json::from_value(flow.clone()).expect("invalid flow json");
      repository.insert(resolve_source(def)).await;
    }

    let (dispatcher, dispatches) = ChannelDispatcher::channel();
    let runner = ExecutorRunner::new(store.clone(), Arc::new(repository), dispatcher);
    let sender = runner.sender();
    let (update_tx, updates) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    tokio::spawn(LocalWorker::new().run(dispatches, sender.clone(), Some(update_tx), cancel.clone()));
    tokio::spawn(runner.start(cancel.clone()));

    Self {
      store,
      sender,
      updates,
      cancel,
    }
  }

  pub async fn start(flows: &[serde_json::Value]) -> Self {
    Self::start_with_store(Arc::new(InMemoryExecutionStore::new()), flows).await
  }

  /// Create an execution of a registered flow and submit it.
  pub async fn run(&self, flow_id: &str, inputs: serde_json::Value) -> Execution {
    let execution = Execution::new(
      None,
      "company.team",
      flow_id,
      1,
      inputs.as_object().cloned().unwrap_or_else(Map::new),
    );
    self.store.create(&execution).await.expect("create failed");
    self.submit(ExecutorCause::Execution {
      execution_id: execution.id.clone(),
      offset: None,
    })
    .await;
    execution
  }

  pub async fn submit(&self, cause: ExecutorCause) {
    self.sender.send(cause).await.expect("runner stopped");
  }

  /// Wait for a saved execution matching `predicate`.
  pub async fn wait_for(&mut self, predicate: impl Fn(&Execution) -> bool) -> Execution {
    tokio::time::timeout(WAIT, async {
      loop {
        let execution = self.updates.recv().await.expect("worker stopped");
        if predicate(&execution) {
          return execution;
        }
      }
    })
    .await
    .expect("timed out waiting for execution")
  }

  /// Wait until the execution reaches a terminal state.
  pub async fn wait_terminal(&mut self, execution_id: &str) -> Execution {
    self
      .wait_for(|e| e.id == execution_id && e.is_terminal())
      .await
  }
}

impl Drop for Harness {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

pub fn runs<'e>(execution: &'e Execution, task_id: &str) -> Vec<&'e TaskRun> {
  execution
    .task_runs
    .iter()
    .filter(|r| r.task_id == task_id)
    .collect()
}

pub fn state_of(execution: &Execution, task_id: &str) -> Option<StateType> {
  runs(execution, task_id).first().map(|r| r.current())
}
