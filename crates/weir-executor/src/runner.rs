//! Executor runner with channel-based triggering.
//!
//! The `ExecutorRunner` owns an mpsc channel of [`ExecutorCause`] events and
//! handles them one at a time: load the execution, join the event, advance,
//! save, then emit side effects. Handling one event at a time keeps a single
//! writer per execution inside the process; the store's sequence id catches
//! writers outside of it.

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::Map;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use weir_execution::{Execution, StateType};
use weir_store::{ExecutionStore, FlowRepository, StoreError};
use weir_workflow::{Flow, FlowSource};

use crate::dispatch::{Dispatch, Dispatcher, NoopDispatcher};
use crate::error::ExecutorError;
use crate::events::{
  ExecutionDelay, ExecutionResumed, ExecutorCause, SubflowExecution, SubflowExecutionEnd,
  SubflowExecutionResult, WorkerJob,
};
use crate::executor::Executor;
use crate::service::ExecutorService;

/// Runner settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
  /// Capacity of the event channel.
  pub buffer_size: usize,
  /// How many times an event is replayed after losing a save race.
  pub max_conflict_retries: u32,
}

impl Default for RunnerConfig {
  fn default() -> Self {
    Self {
      buffer_size: 100,
      max_conflict_retries: 5,
    }
  }
}

/// A runner that advances executions in response to events.
///
/// # Usage
///
/// ```ignore
/// let runner = ExecutorRunner::new(store, flows, dispatcher);
///
/// // Get a sender for workers, timers and operators
/// let sender = runner.sender();
///
/// // Create an execution, then start the loop
/// let execution = runner.create_execution(&flow, inputs).await?;
/// let cancel = CancellationToken::new();
/// runner.start(cancel).await;
/// ```
pub struct ExecutorRunner<D: Dispatcher = NoopDispatcher> {
  sender: mpsc::Sender<ExecutorCause>,
  receiver: mpsc::Receiver<ExecutorCause>,
  store: Arc<dyn ExecutionStore>,
  flows: Arc<dyn FlowRepository>,
  dispatcher: D,
  service: ExecutorService,
  config: RunnerConfig,
  /// Events produced while handling another event, handled right after it.
  pending: VecDeque<ExecutorCause>,
}

impl<D: Dispatcher> ExecutorRunner<D> {
  pub fn new(store: Arc<dyn ExecutionStore>, flows: Arc<dyn FlowRepository>, dispatcher: D) -> Self {
    Self::with_config(store, flows, dispatcher, RunnerConfig::default())
  }

  pub fn with_config(
    store: Arc<dyn ExecutionStore>,
    flows: Arc<dyn FlowRepository>,
    dispatcher: D,
    config: RunnerConfig,
  ) -> Self {
    let (sender, receiver) = mpsc::channel(config.buffer_size);
    Self {
      sender,
      receiver,
      store,
      flows,
      dispatcher,
      service: ExecutorService::new(),
      config,
      pending: VecDeque::new(),
    }
  }

  /// Get a sender handle for submitting events.
  ///
  /// This can be given to workers, timers, operator endpoints, etc.
  pub fn sender(&self) -> mpsc::Sender<ExecutorCause> {
    self.sender.clone()
  }

  pub fn config(&self) -> &RunnerConfig {
    &self.config
  }

  /// Submit an event through the channel.
  pub async fn submit(&self, cause: ExecutorCause) -> Result<(), ExecutorError> {
    self
      .sender
      .send(cause)
      .await
      .map_err(|_| ExecutorError::ChannelClosed)
  }

  /// Store a new execution of `flow` and submit it for advancement.
  pub async fn create_execution(
    &self,
    flow: &Flow,
    inputs: Map<String, serde_json::Value>,
  ) -> Result<Execution, ExecutorError> {
    let execution = Execution::new(
      flow.tenant_id.clone(),
      &flow.namespace,
      &flow.id,
      flow.revision,
      inputs,
    );
    self.store.create(&execution).await?;
    info!(
      execution_id = %execution.id,
      namespace = %flow.namespace,
      flow_id = %flow.id,
      "created execution"
    );

    self
      .submit(ExecutorCause::Execution {
        execution_id: execution.id.clone(),
        offset: None,
      })
      .await?;
    Ok(execution)
  }

  /// Start the event loop.
  ///
  /// This runs until the cancellation token is triggered. Failed events are
  /// logged and the loop moves on.
  pub async fn start(mut self, cancel: CancellationToken) {
    info!("starting executor runner");

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!("executor runner cancelled");
          break;
        }
        cause = self.receiver.recv() => {
          match cause {
            Some(cause) => {
              let name = cause.name();
              if let Err(e) = self.handle(cause).await {
                error!(cause = name, error = %e, "failed to handle event");
              }
            }
            None => {
              info!("executor runner channel closed");
              break;
            }
          }
        }
      }
    }
  }

  /// Handle one event, then every event it produced.
  ///
  /// Only the outcome of `cause` itself is returned; failures of follow-up
  /// events are logged.
  pub async fn handle(&mut self, cause: ExecutorCause) -> Result<(), ExecutorError> {
    let result = self.handle_one(cause).await;

    while let Some(next) = self.pending.pop_front() {
      let name = next.name();
      if let Err(e) = self.handle_one(next).await {
        error!(cause = name, error = %e, "failed to handle follow-up event");
      }
    }

    result
  }

  #[instrument(skip_all, fields(cause = cause.name(), execution_id = cause.execution_id().unwrap_or_default()))]
  async fn handle_one(&mut self, cause: ExecutorCause) -> Result<(), ExecutorError> {
    let execution_id = match &cause {
      ExecutorCause::ExecutionKilled { executions } if executions.len() > 1 => {
        self.pending.extend(executions.iter().map(|kill| ExecutorCause::ExecutionKilled {
          executions: vec![kill.clone()],
        }));
        return Ok(());
      }
      ExecutorCause::WorkerJobResubmit(WorkerJob::Trigger(trigger)) => {
        self.dispatcher.dispatch(Dispatch::WorkerTrigger(trigger.clone()));
        return Ok(());
      }
      _ => match cause.execution_id() {
        Some(id) => id.to_string(),
        None => return Ok(()),
      },
    };

    let mut attempt = 0;
    loop {
      attempt += 1;
      let (execution, seq_id) = self.store.load(&execution_id).await?;
      let source = self.resolve_flow(&execution).await?;

      let mut executor = Executor::new(cause.clone());
      executor.join(execution, seq_id);
      match source {
        Ok(source) => {
          executor.with_flow(source);
        }
        Err(e) => fail_unrunnable(&mut executor, e),
      }

      self.service.join(&mut executor);
      self.service.process(&mut executor);

      if executor.is_execution_updated() {
        let seq_id = executor.increment_and_get_seq_id();
        let Some(execution) = executor.execution() else {
          return Ok(());
        };

        match self.store.save(execution, seq_id).await {
          Ok(()) => {
            debug!(seq_id, from = ?executor.from(), state = %execution.current(), "saved execution");
          }
          Err(StoreError::VersionConflict { stored, .. }) if attempt <= self.config.max_conflict_retries => {
            warn!(attempt, stored, attempted = seq_id, "version conflict, replaying event");
            continue;
          }
          Err(StoreError::VersionConflict { .. }) => {
            return Err(ExecutorError::ConflictRetriesExhausted {
              execution_id,
              attempts: attempt,
            });
          }
          Err(e) => return Err(e.into()),
        }
      }

      if let Some(e) = executor.exception() {
        warn!(error = %e, "event handled with an error");
      }
      self.emit(executor).await;
      return Ok(());
    }
  }

  /// The flow an execution runs. The inner error tells why it cannot run.
  async fn resolve_flow(
    &self,
    execution: &Execution,
  ) -> Result<Result<FlowSource, ExecutorError>, ExecutorError> {
    let source = self
      .flows
      .resolve(
        execution.tenant_id.as_deref(),
        &execution.namespace,
        &execution.flow_id,
        Some(execution.flow_revision),
      )
      .await?;

    Ok(match source {
      Some(FlowSource::Invalid(invalid)) => Err(ExecutorError::InvalidFlow {
        namespace: invalid.namespace,
        flow_id: invalid.id,
        message: invalid.error,
      }),
      Some(source) => Ok(source),
      None => Err(ExecutorError::FlowNotFound {
        namespace: execution.namespace.clone(),
        flow_id: execution.flow_id.clone(),
      }),
    })
  }

  /// Emit the side effects of a saved pass.
  async fn emit(&mut self, executor: Executor) {
    for task in executor.worker_tasks() {
      self.dispatcher.dispatch(Dispatch::WorkerTask(task.clone()));
    }
    for trigger in executor.worker_triggers() {
      self.dispatcher.dispatch(Dispatch::WorkerTrigger(trigger.clone()));
    }
    for kill in executor.worker_kills() {
      self.dispatcher.dispatch(Dispatch::WorkerKill(kill.clone()));
    }
    for delay in executor.execution_delays() {
      self.schedule_resume(delay);
      self.dispatcher.dispatch(Dispatch::ExecutionDelay(delay.clone()));
    }

    for request in executor.subflow_executions() {
      if let Err(e) = self.start_subflow(request).await {
        error!(
          child_execution_id = %request.execution_id,
          error = %e,
          "failed to start subflow execution"
        );
      }
    }

    self
      .pending
      .extend(executor.execution_kills().iter().map(|kill| ExecutorCause::ExecutionKilled {
        executions: vec![kill.clone()],
      }));

    if !executor.is_execution_updated() {
      return;
    }
    let Some(execution) = executor.execution() else {
      return;
    };

    let just_ended = execution.is_terminal() && !executor.original_state().is_some_and(StateType::is_terminal);
    if just_ended {
      info!(execution_id = %execution.id, state = %execution.current(), "execution terminated");
      if let Some(end) = SubflowExecutionEnd::of(execution) {
        self.pending.push_back(ExecutorCause::SubflowExecutionEnd(end));
      }
    }

    self.dispatcher.dispatch(Dispatch::ExecutionUpdated(execution.clone()));
  }

  /// Submit a resume event once the delay elapses.
  fn schedule_resume(&self, delay: &ExecutionDelay) {
    let sender = self.sender.clone();
    let wait = (delay.resume_at - chrono::Utc::now())
      .to_std()
      .unwrap_or_default();
    let execution_id = delay.execution_id.clone();

    debug!(%execution_id, resume_at = %delay.resume_at, "scheduling resume");
    tokio::spawn(async move {
      tokio::time::sleep(wait).await;
      // The runner may have shut down meanwhile.
      let _ = sender
        .send(ExecutorCause::ExecutionResumed(ExecutionResumed { execution_id }))
        .await;
    });
  }

  /// Create the child execution a subflow run asked for. A missing child flow
  /// fails the calling run.
  async fn start_subflow(&mut self, request: &SubflowExecution) -> Result<(), ExecutorError> {
    let source = self
      .flows
      .resolve(
        request.tenant_id.as_deref(),
        &request.flow.namespace,
        &request.flow.flow_id,
        request.flow.revision,
      )
      .await?;

    let Some(flow) = source.as_ref().and_then(FlowSource::flow) else {
      warn!(
        namespace = %request.flow.namespace,
        flow_id = %request.flow.flow_id,
        "subflow not found or invalid"
      );
      self
        .pending
        .push_back(ExecutorCause::SubflowExecutionResult(SubflowExecutionResult {
          parent: request.parent.clone(),
          state: StateType::Failed,
          outputs: Map::new(),
        }));
      return Ok(());
    };

    let mut child = Execution::new(
      request.tenant_id.clone(),
      &flow.namespace,
      &flow.id,
      flow.revision,
      request.inputs.clone(),
    )
    .with_parent(request.parent.clone());
    child.id = request.execution_id.clone();

    self.store.create(&child).await?;
    info!(
      child_execution_id = %child.id,
      parent_task_run_id = %request.parent.task_run_id,
      flow_id = %flow.id,
      "started subflow execution"
    );

    self.pending.push_back(ExecutorCause::Execution {
      execution_id: child.id,
      offset: None,
    });
    Ok(())
  }
}

/// Fail an execution whose flow cannot be run.
fn fail_unrunnable(executor: &mut Executor, error: ExecutorError) {
  let Some(mut execution) = executor.execution().cloned() else {
    return;
  };
  if execution.is_terminal() {
    return;
  }

  error!(error = %error, "execution flow cannot be run");
  for run in execution.task_runs.iter_mut().filter(|r| !r.state.is_terminal()) {
    run.state.transition(StateType::Failed);
  }
  execution.transition(StateType::Failed);
  executor
    .with_exception(error, "runner.flow")
    .with_execution(execution, "runner.flow");
}
