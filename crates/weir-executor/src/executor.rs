//! The per-event accumulator.
//!
//! An [`Executor`] lives for one pass: it holds the event that triggered the
//! pass, the execution snapshot being advanced, and every side effect the pass
//! decided on. None of its methods fail; errors are recorded with
//! [`Executor::with_exception`] so the caller can still persist the snapshot
//! and emit what was accumulated.

use serde::Serialize;
use weir_execution::{Execution, StateType, TaskRun};
use weir_workflow::FlowSource;

use crate::error::ExecutorError;
use crate::events::{
  ExecutionDelay, ExecutionKilledExecution, ExecutorCause, SubflowExecution, SubflowExecutionResult,
  WorkerKill, WorkerTask, WorkerTrigger,
};

/// The persisted projection of an executor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SerializedExecutor {
  pub execution: Option<Execution>,
  pub offset: Option<u64>,
  pub seq_id: u64,
}

#[derive(Debug)]
pub struct Executor {
  cause: ExecutorCause,
  execution: Option<Execution>,
  original_state: Option<StateType>,
  exception: Option<ExecutorError>,
  from: Vec<String>,
  execution_updated: bool,
  flow: Option<FlowSource>,
  task_runs: Vec<TaskRun>,
  worker_tasks: Vec<WorkerTask>,
  worker_triggers: Vec<WorkerTrigger>,
  execution_delays: Vec<ExecutionDelay>,
  subflow_executions: Vec<SubflowExecution>,
  subflow_execution_results: Vec<SubflowExecutionResult>,
  worker_kills: Vec<WorkerKill>,
  execution_kills: Vec<ExecutionKilledExecution>,
  seq_id: u64,
}

impl Executor {
  /// An executor for an event. The execution is joined later.
  pub fn new(cause: ExecutorCause) -> Self {
    Self {
      cause,
      execution: None,
      original_state: None,
      exception: None,
      from: Vec::new(),
      execution_updated: false,
      flow: None,
      task_runs: Vec::new(),
      worker_tasks: Vec::new(),
      worker_triggers: Vec::new(),
      execution_delays: Vec::new(),
      subflow_executions: Vec::new(),
      subflow_execution_results: Vec::new(),
      worker_kills: Vec::new(),
      execution_kills: Vec::new(),
      seq_id: 0,
    }
  }

  /// An executor triggered by the execution itself.
  pub fn of_execution(execution: Execution, offset: Option<u64>) -> Self {
    let mut executor = Self::new(ExecutorCause::Execution {
      execution_id: execution.id.clone(),
      offset,
    });
    executor.join(execution, 0);
    executor
  }

  /// Attach the stored execution and its sequence id.
  pub fn join(&mut self, execution: Execution, seq_id: u64) -> &mut Self {
    self.original_state = Some(execution.current());
    self.execution = Some(execution);
    self.seq_id = seq_id;
    self
  }

  /// Whether the execution may be advanced. When false the pass is skipped,
  /// but side effects accumulated so far must still be emitted.
  pub fn can_be_processed(&self) -> bool {
    if self.exception.is_some() {
      return false;
    }

    let flow_runnable = match &self.flow {
      Some(FlowSource::Resolved(flow)) => !flow.tasks.is_empty(),
      Some(FlowSource::Invalid(_)) | None => false,
    };
    if !flow_runnable {
      return false;
    }

    match &self.execution {
      Some(execution) => !execution.deleted && !execution.is_paused(),
      None => false,
    }
  }

  pub fn with_flow(&mut self, flow: FlowSource) -> &mut Self {
    self.flow = Some(flow);
    self
  }

  /// Replace the execution snapshot.
  pub fn with_execution(&mut self, execution: Execution, from: &str) -> &mut Self {
    self.execution = Some(execution);
    self.execution_updated = true;
    self.from.push(from.to_string());
    self
  }

  /// Record a failure. Accumulated side effects are kept.
  pub fn with_exception(&mut self, exception: ExecutorError, from: &str) -> &mut Self {
    self.exception = Some(exception);
    self.from.push(from.to_string());
    self
  }

  pub fn with_task_runs(&mut self, task_runs: Vec<TaskRun>, from: &str) -> &mut Self {
    self.task_runs.extend(task_runs);
    self.from.push(from.to_string());
    self
  }

  pub fn with_worker_tasks(&mut self, worker_tasks: Vec<WorkerTask>, from: &str) -> &mut Self {
    self.worker_tasks.extend(worker_tasks);
    self.from.push(from.to_string());
    self
  }

  pub fn with_worker_triggers(&mut self, worker_triggers: Vec<WorkerTrigger>, from: &str) -> &mut Self {
    self.worker_triggers.extend(worker_triggers);
    self.from.push(from.to_string());
    self
  }

  pub fn with_execution_delays(&mut self, delays: Vec<ExecutionDelay>, from: &str) -> &mut Self {
    self.execution_delays.extend(delays);
    self.from.push(from.to_string());
    self
  }

  pub fn with_subflow_executions(&mut self, subflows: Vec<SubflowExecution>, from: &str) -> &mut Self {
    self.subflow_executions.extend(subflows);
    self.from.push(from.to_string());
    self
  }

  pub fn with_subflow_execution_results(
    &mut self,
    results: Vec<SubflowExecutionResult>,
    from: &str,
  ) -> &mut Self {
    self.subflow_execution_results.extend(results);
    self.from.push(from.to_string());
    self
  }

  pub fn with_worker_kills(&mut self, kills: Vec<WorkerKill>, from: &str) -> &mut Self {
    self.worker_kills.extend(kills);
    self.from.push(from.to_string());
    self
  }

  pub fn with_execution_kills(&mut self, kills: Vec<ExecutionKilledExecution>, from: &str) -> &mut Self {
    self.execution_kills.extend(kills);
    self.from.push(from.to_string());
    self
  }

  /// Advance the write sequence. The result is the version the next save
  /// must carry.
  pub fn increment_and_get_seq_id(&mut self) -> u64 {
    self.seq_id += 1;
    self.seq_id
  }

  /// Project to what is persisted, dropping the per-pass collections.
  pub fn serialize(&self) -> SerializedExecutor {
    SerializedExecutor {
      execution: self.execution.clone(),
      offset: self.offset(),
      seq_id: self.seq_id,
    }
  }

  pub fn cause(&self) -> &ExecutorCause {
    &self.cause
  }

  pub fn offset(&self) -> Option<u64> {
    match self.cause {
      ExecutorCause::Execution { offset, .. } => offset,
      _ => None,
    }
  }

  pub fn execution(&self) -> Option<&Execution> {
    self.execution.as_ref()
  }

  pub fn execution_id(&self) -> Option<&str> {
    self
      .execution
      .as_ref()
      .map(|e| e.id.as_str())
      .or_else(|| self.cause.execution_id())
  }

  /// State of the execution when it was joined.
  pub fn original_state(&self) -> Option<StateType> {
    self.original_state
  }

  pub fn exception(&self) -> Option<&ExecutorError> {
    self.exception.as_ref()
  }

  /// Names of the stages that changed this executor, in order.
  pub fn from(&self) -> &[String] {
    &self.from
  }

  pub fn is_execution_updated(&self) -> bool {
    self.execution_updated
  }

  pub fn flow(&self) -> Option<&FlowSource> {
    self.flow.as_ref()
  }

  pub fn task_runs(&self) -> &[TaskRun] {
    &self.task_runs
  }

  pub fn worker_tasks(&self) -> &[WorkerTask] {
    &self.worker_tasks
  }

  pub fn worker_triggers(&self) -> &[WorkerTrigger] {
    &self.worker_triggers
  }

  pub fn execution_delays(&self) -> &[ExecutionDelay] {
    &self.execution_delays
  }

  pub fn subflow_executions(&self) -> &[SubflowExecution] {
    &self.subflow_executions
  }

  pub fn subflow_execution_results(&self) -> &[SubflowExecutionResult] {
    &self.subflow_execution_results
  }

  pub fn worker_kills(&self) -> &[WorkerKill] {
    &self.worker_kills
  }

  pub fn execution_kills(&self) -> &[ExecutionKilledExecution] {
    &self.execution_kills
  }

  pub fn seq_id(&self) -> u64 {
    self.seq_id
  }
}
