//! Joining events into executions and advancing them.
//!
//! [`ExecutorService::join`] merges the triggering event into the execution.
//! [`ExecutorService::process`] then advances the execution as far as it can
//! go without outside input: it starts created runs, creates the next runs,
//! settles composite runs and ends the execution.

use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument, warn};
use weir_config::{TaskDef, TaskKind};
use weir_execution::{Execution, NextTaskRun, ParentTaskRun, StateType, TaskRun};
use weir_runtime::{
  FailurePolicy, RunContext, RuntimeError, flowable, resolve_sequential_nexts, resolve_state,
  resolve_tasks,
};
use weir_workflow::{Flow, FlowSource};

use crate::events::{
  ExecutionDelay, ExecutionKilledExecution, ExecutorCause, SubflowExecution, SubflowExecutionResult,
  WorkerJob, WorkerKill, WorkerTask,
};
use crate::executor::Executor;

/// Output key of a subflow run holding the child execution id.
pub const SUBFLOW_EXECUTION_ID: &str = "executionId";

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutorService;

impl ExecutorService {
  pub fn new() -> Self {
    Self
  }

  /// Merge the executor's triggering event into its execution.
  #[instrument(skip_all, fields(execution_id = executor.execution_id().unwrap_or_default(), cause = executor.cause().name()))]
  pub fn join(&self, executor: &mut Executor) {
    let Some(mut execution) = executor.execution().cloned() else {
      return;
    };
    let from = format!("join.{}", executor.cause().name());

    match executor.cause().clone() {
      ExecutorCause::Execution { .. } => {}

      ExecutorCause::WorkerTaskResult(result) => {
        let task_run_id = result.task_run.id.clone();
        let task_run = with_task_policy(executor, result.task_run);
        match execution.merge_task_run(task_run) {
          Ok(true) => {
            executor.with_execution(execution, &from);
          }
          Ok(false) => debug!(%task_run_id, "ignoring result for a terminated task run"),
          Err(e) => {
            warn!(%task_run_id, error = %e, "rejecting worker task result");
            executor.with_exception(e.into(), &from);
          }
        }
      }

      ExecutorCause::SubflowExecutionResult(result) => {
        join_subflow_result(executor, execution, result, &from);
      }

      ExecutorCause::SubflowExecutionEnd(end) => {
        join_subflow_result(executor, execution, end.into_result(), &from);
      }

      ExecutorCause::WorkerJobResubmit(WorkerJob::Task(task)) => {
        match execution.find_task_run(&task.task_run.id) {
          Some(run) if !run.state.is_terminal() => {
            info!(task_run_id = %run.id, "resubmitting worker task");
            executor.with_worker_tasks(vec![task], &from);
          }
          _ => debug!(task_run_id = %task.task_run.id, "not resubmitting a terminated task run"),
        }
      }

      ExecutorCause::WorkerJobResubmit(WorkerJob::Trigger(trigger)) => {
        executor.with_worker_triggers(vec![trigger], &from);
      }

      ExecutorCause::ExecutionResumed(_) => {
        if !execution.is_paused() {
          debug!("ignoring resume of an execution that is not paused");
          return;
        }
        for run in execution.task_runs.iter_mut().filter(|r| r.current().is_paused()) {
          run.state.transition(StateType::Success);
        }
        execution.transition(StateType::Running);
        info!("resuming execution");
        executor.with_execution(execution, &from);
      }

      ExecutorCause::ExecutionKilled { .. } => {
        if execution.is_terminal() || execution.current() == StateType::Killing {
          debug!("ignoring kill of an execution that is already ending");
          return;
        }
        execution.transition(StateType::Killing);
        info!("killing execution");
        executor.with_execution(execution, &from);
      }
    }
  }

  /// Advance the execution until it needs outside input.
  ///
  /// Runtime errors do not escape: they are recorded on the executor and the
  /// execution is failed.
  #[instrument(skip_all, fields(execution_id = executor.execution_id().unwrap_or_default()))]
  pub fn process(&self, executor: &mut Executor) {
    if !executor.can_be_processed() {
      debug!("execution cannot be processed");
      return;
    }

    let (Some(FlowSource::Resolved(flow)), Some(original)) =
      (executor.flow().cloned(), executor.execution().cloned())
    else {
      return;
    };

    let mut execution = original.clone();
    match advance(&flow, &mut execution, executor) {
      Ok(()) => {
        if execution != original {
          executor.with_execution(execution, "process");
        }
      }
      Err(e) => {
        error!(error = %e, "failed to advance execution");
        fail(&mut execution);
        executor
          .with_exception(e.into(), "process")
          .with_execution(execution, "process.failed");
      }
    }
  }
}

fn join_subflow_result(
  executor: &mut Executor,
  mut execution: Execution,
  result: SubflowExecutionResult,
  from: &str,
) {
  let run = match execution.task_run(&result.parent.task_run_id) {
    Ok(run) => run.clone(),
    Err(e) => {
      executor.with_exception(e.into(), from);
      return;
    }
  };

  if run.state.is_terminal() {
    debug!(task_run_id = %run.id, "ignoring subflow result for a terminated task run");
    return;
  }

  let state = task_policy(executor, &run.task_id).apply(result.state);
  info!(task_run_id = %run.id, child_state = %result.state, %state, "subflow ended");
  execution.upsert_task_run(run.with_outputs(result.outputs.clone()).with_state(state));
  executor
    .with_subflow_execution_results(vec![result], from)
    .with_execution(execution, from);
}

/// Failure policy of the task behind `task_id`, or the default one when the
/// flow is not loaded.
fn task_policy(executor: &Executor, task_id: &str) -> FailurePolicy {
  executor
    .flow()
    .and_then(FlowSource::flow)
    .and_then(|flow| flow.find_task(task_id))
    .map(FailurePolicy::of)
    .unwrap_or_default()
}

/// Downgrade a leaf run's reported outcome by its own task's policy.
fn with_task_policy(executor: &Executor, task_run: TaskRun) -> TaskRun {
  let reported = task_run.current();
  let state = task_policy(executor, &task_run.task_id).apply(reported);
  if state == reported {
    return task_run;
  }
  debug!(task_run_id = %task_run.id, %reported, %state, "outcome downgraded by task policy");
  task_run.with_state(state)
}

fn advance(flow: &Flow, execution: &mut Execution, executor: &mut Executor) -> Result<(), RuntimeError> {
  loop {
    if execution.is_terminal() || execution.is_paused() {
      return Ok(());
    }

    let changed = if execution.current() == StateType::Killing {
      kill(flow, execution, executor)
    } else {
      step(flow, execution, executor)?
    };

    if !changed {
      return Ok(());
    }
  }
}

fn step(flow: &Flow, execution: &mut Execution, executor: &mut Executor) -> Result<bool, RuntimeError> {
  let mut changed = false;
  if execution.current().is_created() {
    execution.transition(StateType::Running);
    changed = true;
  }

  changed |= start_created(flow, execution, executor)?;
  if execution.is_paused() {
    return Ok(true);
  }

  changed |= create_nexts(flow, execution, executor)?;
  changed |= resolve_states(flow, execution)?;
  changed |= end(flow, execution);
  Ok(changed)
}

fn find_task<'f>(flow: &'f Flow, run: &TaskRun) -> Result<&'f TaskDef, RuntimeError> {
  flow
    .find_task(&run.task_id)
    .ok_or_else(|| RuntimeError::TaskNotFound {
      task_id: run.task_id.clone(),
    })
}

fn is_flowable(flow: &Flow, run: &TaskRun) -> bool {
  flow.find_task(&run.task_id).is_some_and(TaskDef::is_flowable)
}

/// Start every created run: composites compute their outputs, leaf tasks are
/// dispatched, pauses pause and subflows are requested.
fn start_created(flow: &Flow, execution: &mut Execution, executor: &mut Executor) -> Result<bool, RuntimeError> {
  let created: Vec<TaskRun> = execution
    .task_runs
    .iter()
    .filter(|r| r.current().is_created())
    .cloned()
    .collect();
  let changed = !created.is_empty();

  for run in created {
    let task = find_task(flow, &run)?;
    let ctx = RunContext::for_task_run(flow, execution, task, &run);

    let started = match flowable(task) {
      Some(composite) => {
        let outputs = composite.outputs(&ctx)?;
        run.with_outputs(outputs).with_state(StateType::Running)
      }
      None => start_leaf(task, run, &ctx, execution, executor)?,
    };
    execution.upsert_task_run(started);
  }

  Ok(changed)
}

fn start_leaf(
  task: &TaskDef,
  run: TaskRun,
  ctx: &RunContext,
  execution: &mut Execution,
  executor: &mut Executor,
) -> Result<TaskRun, RuntimeError> {
  match &task.kind {
    TaskKind::Pause(pause) => {
      if let Some(delay_ms) = pause.delay_ms {
        executor.with_execution_delays(
          vec![ExecutionDelay::after_ms(&execution.id, &run.id, delay_ms)],
          "process.pause",
        );
      }
      info!(task_run_id = %run.id, task_id = %run.task_id, "pausing execution");
      execution.transition(StateType::Paused);
      Ok(run.with_state(StateType::Paused))
    }

    TaskKind::Subflow(subflow) => {
      let mut inputs = Map::new();
      for (name, template) in &subflow.inputs {
        inputs.insert(name.clone(), render_value(ctx, template)?);
      }

      let child_id = uuid::Uuid::new_v4().to_string();
      executor.with_subflow_executions(
        vec![SubflowExecution {
          execution_id: child_id.clone(),
          parent: ParentTaskRun {
            execution_id: execution.id.clone(),
            task_run_id: run.id.clone(),
          },
          tenant_id: execution.tenant_id.clone(),
          flow: subflow.flow.clone(),
          inputs,
        }],
        "process.subflow",
      );

      let mut outputs = Map::new();
      outputs.insert(SUBFLOW_EXECUTION_ID.to_string(), Value::String(child_id));
      let state = if subflow.wait {
        StateType::Running
      } else {
        StateType::Success
      };
      Ok(run.with_outputs(outputs).with_state(state))
    }

    _ => {
      let running = run.with_state(StateType::Running);
      debug!(task_run_id = %running.id, task_id = %running.task_id, "dispatching worker task");
      executor.with_worker_tasks(
        vec![WorkerTask {
          task_run: running.clone(),
          task: task.clone(),
          variables: ctx.variables().clone(),
        }],
        "process.worker_task",
      );
      Ok(running)
    }
  }
}

/// Render a template, keeping JSON results structured.
fn render_value(ctx: &RunContext, template: &str) -> Result<Value, RuntimeError> {
  let rendered = ctx.render(template)?;
  match serde_json::from_str(&rendered) {
    Ok(value) => Ok(value),
    Err(_) => Ok(Value::String(rendered)),
  }
}

fn root_nexts(flow: &Flow, execution: &Execution) -> Vec<NextTaskRun> {
  resolve_sequential_nexts(
    execution,
    &resolve_tasks(&flow.tasks, None),
    &resolve_tasks(&flow.errors, None),
    &resolve_tasks(&flow.finally, None),
  )
}

fn running_flowables(flow: &Flow, execution: &Execution) -> Vec<TaskRun> {
  execution
    .task_runs
    .iter()
    .filter(|r| r.current() == StateType::Running && is_flowable(flow, r))
    .cloned()
    .collect()
}

/// Create the next runs of the flow root and of every running composite.
fn create_nexts(flow: &Flow, execution: &mut Execution, executor: &mut Executor) -> Result<bool, RuntimeError> {
  let mut nexts = root_nexts(flow, execution);

  for run in running_flowables(flow, execution) {
    let task = find_task(flow, &run)?;
    if let Some(composite) = flowable(task) {
      let ctx = RunContext::for_task_run(flow, execution, task, &run);
      nexts.extend(composite.resolve_nexts(&ctx, execution, &run)?);
    }
  }

  if nexts.is_empty() {
    return Ok(false);
  }

  let runs: Vec<TaskRun> = nexts.into_iter().map(|n| n.task_run).collect();
  for run in &runs {
    debug!(task_run_id = %run.id, task_id = %run.task_id, value = ?run.value, "creating task run");
    execution.upsert_task_run(run.clone());
  }
  executor.with_task_runs(runs, "process.nexts");
  Ok(true)
}

/// Settle running composites, children before parents.
fn resolve_states(flow: &Flow, execution: &mut Execution) -> Result<bool, RuntimeError> {
  let mut changed = false;

  // Children are always created after their parent.
  for run in running_flowables(flow, execution).into_iter().rev() {
    let task = find_task(flow, &run)?;
    let Some(composite) = flowable(task) else {
      continue;
    };

    let ctx = RunContext::for_task_run(flow, execution, task, &run);
    if let Some(state) = composite.resolve_state(&ctx, execution, &run)? {
      debug!(task_run_id = %run.id, task_id = %run.task_id, %state, "task run ended");
      execution.upsert_task_run(run.with_state(state));
      changed = true;
    }
  }

  Ok(changed)
}

/// End the execution once nothing is pending and nothing is left to create.
fn end(flow: &Flow, execution: &mut Execution) -> bool {
  if execution.has_pending_task_runs() || !root_nexts(flow, execution).is_empty() {
    return false;
  }

  let ctx = RunContext::new(flow, execution);
  let state = resolve_state(
    &ctx,
    execution,
    &resolve_tasks(&flow.tasks, None),
    &resolve_tasks(&flow.errors, None),
    &resolve_tasks(&flow.finally, None),
  );

  match state {
    Some(state) => {
      info!(%state, "execution ended");
      execution.transition(state);
      true
    }
    None => false,
  }
}

/// Wind down a killing execution: nothing new starts, running work is asked
/// to stop, and the execution is killed once no leaf run is pending.
fn kill(flow: &Flow, execution: &mut Execution, executor: &mut Executor) -> bool {
  let mut changed = false;
  let mut worker_kills = Vec::new();
  let mut execution_kills = Vec::new();
  let tenant_id = execution.tenant_id.clone();
  let cascade = kill_cascades(executor, &execution.id);

  for run in execution.task_runs.iter_mut() {
    let task = flow.find_task(&run.task_id);
    let composite = task.is_some_and(TaskDef::is_flowable);

    match run.current() {
      StateType::Created | StateType::Paused => {
        run.state.transition(StateType::Killed);
        changed = true;
      }
      StateType::Running | StateType::Restarted if !composite => {
        let is_subflow = task.is_some_and(|t| matches!(t.kind, TaskKind::Subflow(_)));
        let child_id = run.outputs.get(SUBFLOW_EXECUTION_ID).and_then(Value::as_str);

        match (is_subflow, child_id) {
          (true, Some(child_id)) if cascade => {
            execution_kills.push(ExecutionKilledExecution {
              execution_id: child_id.to_string(),
              tenant_id: tenant_id.clone(),
              is_on_kill_cascade: true,
            });
            run.state.transition(StateType::Killing);
          }
          (true, _) => run.state.transition(StateType::Killed),
          (false, _) => {
            run.state.transition(StateType::Killing);
            worker_kills.push(WorkerKill { task_run: run.clone() });
          }
        }
        changed = true;
      }
      _ => {}
    }
  }

  if !worker_kills.is_empty() {
    executor.with_worker_kills(worker_kills, "process.kill");
  }
  if !execution_kills.is_empty() {
    executor.with_execution_kills(execution_kills, "process.kill");
  }

  let leaf_pending = execution
    .task_runs
    .iter()
    .any(|r| !r.state.is_terminal() && !is_flowable(flow, r));
  if !leaf_pending {
    for run in execution.task_runs.iter_mut().filter(|r| !r.state.is_terminal()) {
      run.state.transition(StateType::Killed);
    }
    info!("execution killed");
    execution.transition(StateType::Killed);
    changed = true;
  }

  changed
}

/// Whether killing `execution_id` also kills its child executions. Only the
/// kill event itself can opt out.
fn kill_cascades(executor: &Executor, execution_id: &str) -> bool {
  match executor.cause() {
    ExecutorCause::ExecutionKilled { executions } => executions
      .iter()
      .find(|kill| kill.execution_id == execution_id)
      .is_none_or(|kill| kill.is_on_kill_cascade),
    _ => true,
  }
}

/// Fail every unfinished run and the execution itself.
fn fail(execution: &mut Execution) {
  for run in execution.task_runs.iter_mut().filter(|r| !r.state.is_terminal()) {
    run.state.transition(StateType::Failed);
  }
  execution.transition(StateType::Failed);
}
