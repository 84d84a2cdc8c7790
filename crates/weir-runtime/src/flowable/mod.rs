//! The flowable-task contract and its composite variants.
//!
//! Every composite task exposes the same operations through [`FlowableTask`].
//! The generic algorithms (sequential and parallel scheduling, state
//! resolution) live here so variants only decide *which* children they have.

mod for_each;
mod if_task;
mod parallel;
mod sequential;

pub use for_each::{FOR_EACH_VALUES, ForEach};
pub use if_task::{EVALUATION_RESULT, If};
pub use parallel::Parallel;
pub use sequential::Sequential;

use weir_config::{TaskDef, TaskKind};
use weir_execution::{Execution, NextTaskRun, StateType, TaskRun};
use weir_workflow::GraphCluster;

use crate::aggregate::{ChildOutcome, FailurePolicy, Outcomes, aggregate, branch_failed, branch_settled};
use crate::context::RunContext;
use crate::error::RuntimeError;
use crate::resolved::ResolvedTask;

/// A composite task that orchestrates children rather than doing leaf work.
///
/// Implementations are stateless: everything that varies per run is read
/// from the parent run and the execution.
pub trait FlowableTask {
  /// The children of this run, in order. Disabled tasks are left out.
  fn child_tasks(
    &self,
    ctx: &RunContext,
    parent: &TaskRun,
  ) -> Result<Vec<ResolvedTask<'_>>, RuntimeError>;

  /// Task runs to create next for this parent.
  fn resolve_nexts(
    &self,
    ctx: &RunContext,
    execution: &Execution,
    parent: &TaskRun,
  ) -> Result<Vec<NextTaskRun>, RuntimeError>;

  /// The terminal state of this parent, or `None` while children are pending.
  fn resolve_state(
    &self,
    ctx: &RunContext,
    execution: &Execution,
    parent: &TaskRun,
  ) -> Result<Option<StateType>, RuntimeError>;

  /// Structural graph of this task's branches. Visualization only.
  fn tasks_tree(
    &self,
    execution: Option<&Execution>,
    task_run: Option<&TaskRun>,
    parent_values: &[String],
  ) -> GraphCluster;

  /// Every task reachable from this one through any branch, including
  /// disabled tasks and branches that were not chosen.
  fn all_child_tasks(&self) -> Vec<&TaskDef>;

  /// Outputs computed once when the run starts. The executor stores them in
  /// the run, where later calls read decisions back instead of recomputing.
  fn outputs(
    &self,
    _ctx: &RunContext,
  ) -> Result<serde_json::Map<String, serde_json::Value>, RuntimeError> {
    Ok(serde_json::Map::new())
  }
}

/// The flowable implementation of a task, if it is a composite task.
pub fn flowable(task: &TaskDef) -> Option<Box<dyn FlowableTask + '_>> {
  match &task.kind {
    TaskKind::If(config) => Some(Box::new(If::new(task, config))),
    TaskKind::Sequential(config) => Some(Box::new(Sequential::new(task, config))),
    TaskKind::Parallel(config) => Some(Box::new(Parallel::new(task, config))),
    TaskKind::ForEach(config) => Some(Box::new(ForEach::new(task, config))),
    TaskKind::Log(_) | TaskKind::Fail(_) | TaskKind::Pause(_) | TaskKind::Subflow(_) => None,
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
  Primary,
  Errors,
  Finally,
}

fn outcomes(execution: &Execution, tasks: &[ResolvedTask<'_>]) -> Vec<ChildOutcome> {
  tasks
    .iter()
    .map(|t| ChildOutcome::of(t.find_run(execution)))
    .collect()
}

/// The branch that still has work to do. Errors only run once a primary
/// child failed; finally runs once primary and errors are settled.
fn active_branch(
  execution: &Execution,
  tasks: &[ResolvedTask<'_>],
  errors: &[ResolvedTask<'_>],
  finally: &[ResolvedTask<'_>],
) -> Option<Branch> {
  let primary = outcomes(execution, tasks);
  if !branch_settled(&primary) {
    return Some(Branch::Primary);
  }
  if branch_failed(&primary) && !branch_settled(&outcomes(execution, errors)) {
    return Some(Branch::Errors);
  }
  if !branch_settled(&outcomes(execution, finally)) {
    return Some(Branch::Finally);
  }
  None
}

/// The first child not yet created, once every earlier one succeeded.
fn sequential_step(execution: &Execution, tasks: &[ResolvedTask<'_>]) -> Vec<NextTaskRun> {
  for task in tasks {
    match task.find_run(execution) {
      None => return vec![task.to_next_task_run(execution)],
      Some(run) if !run.state.is_terminal() => return vec![],
      Some(run) if run.current().is_failed() => return vec![],
      Some(_) => continue,
    }
  }
  vec![]
}

/// Schedule children one at a time in list order, then errors, then finally.
pub fn resolve_sequential_nexts(
  execution: &Execution,
  tasks: &[ResolvedTask<'_>],
  errors: &[ResolvedTask<'_>],
  finally: &[ResolvedTask<'_>],
) -> Vec<NextTaskRun> {
  if execution.current() == StateType::Killing {
    return vec![];
  }

  match active_branch(execution, tasks, errors, finally) {
    Some(Branch::Primary) => sequential_step(execution, tasks),
    Some(Branch::Errors) => sequential_step(execution, errors),
    Some(Branch::Finally) => sequential_step(execution, finally),
    None => vec![],
  }
}

/// Schedule every primary child at once, up to `concurrency` running at a
/// time. No new child starts after one failed. Errors and finally run
/// sequentially.
pub fn resolve_parallel_nexts(
  execution: &Execution,
  tasks: &[ResolvedTask<'_>],
  errors: &[ResolvedTask<'_>],
  finally: &[ResolvedTask<'_>],
  concurrency: Option<usize>,
) -> Vec<NextTaskRun> {
  if execution.current() == StateType::Killing {
    return vec![];
  }

  match active_branch(execution, tasks, errors, finally) {
    Some(Branch::Primary) => {
      let primary = outcomes(execution, tasks);
      if branch_failed(&primary) {
        return vec![];
      }

      let running = primary
        .iter()
        .filter(|o| matches!(o, ChildOutcome::Pending(_)))
        .count();
      let slots = concurrency.map_or(usize::MAX, |c| c.saturating_sub(running));

      tasks
        .iter()
        .filter(|t| t.find_run(execution).is_none())
        .take(slots)
        .map(|t| t.to_next_task_run(execution))
        .collect()
    }
    Some(Branch::Errors) => sequential_step(execution, errors),
    Some(Branch::Finally) => sequential_step(execution, finally),
    None => vec![],
  }
}

/// Aggregate the state of a parent from its children, errors and finally.
pub fn resolve_state(
  ctx: &RunContext,
  execution: &Execution,
  tasks: &[ResolvedTask<'_>],
  errors: &[ResolvedTask<'_>],
  finally: &[ResolvedTask<'_>],
) -> Option<StateType> {
  let outcomes = Outcomes {
    primary: outcomes(execution, tasks),
    errors: outcomes(execution, errors),
    finally: outcomes(execution, finally),
  };
  aggregate(&outcomes, ctx.policy())
}

/// State of a parent that has no applicable children: its own outcome so far.
pub fn inherit_state(parent: &TaskRun, policy: FailurePolicy) -> StateType {
  let current = parent.current();
  if current.is_terminal() {
    policy.apply(current)
  } else {
    StateType::Success
  }
}

#[cfg(test)]
pub(crate) mod test_support {
  use weir_config::FlowDef;
  use weir_execution::{Execution, StateType, TaskRun};
  use weir_workflow::Flow;

  pub fn flow(json: &str) -> Flow {
    let def: FlowDef = serde_json::from_str(json).unwrap();
    Flow::from_validated(def)
  }

  pub fn execution(flow: &Flow, inputs: serde_json::Value) -> Execution {
    let inputs = inputs.as_object().cloned().unwrap_or_default();
    Execution::new(None, &flow.namespace, &flow.id, flow.revision, inputs)
  }

  /// Add a run of `task_id` under `parent` in `state` and return it.
  pub fn add_run(
    execution: &mut Execution,
    task_id: &str,
    parent: Option<&TaskRun>,
    value: Option<&str>,
    state: StateType,
  ) -> TaskRun {
    let run = TaskRun::new(
      &execution.id,
      task_id,
      parent.map(|p| p.id.clone()),
      value.map(str::to_string).or_else(|| parent.and_then(|p| p.value.clone())),
    )
    .with_state(state);
    execution.upsert_task_run(run.clone());
    run
  }
}

#[cfg(test)]
mod tests {
  use super::test_support::*;
  use super::*;
  use crate::resolved::resolve_tasks;

  const FLOW: &str = r#"{
    "id": "f", "namespace": "n",
    "tasks": [
      { "id": "a", "type": "log", "message": "a" },
      { "id": "b", "type": "log", "message": "b" },
      { "id": "skipped", "type": "log", "message": "c", "disabled": true },
      { "id": "c", "type": "log", "message": "c" }
    ],
    "errors": [{ "id": "on_error", "type": "log", "message": "e" }],
    "finally": [{ "id": "cleanup", "type": "log", "message": "f" }]
  }"#;

  fn ids(nexts: &[NextTaskRun]) -> Vec<&str> {
    nexts.iter().map(|n| n.task_run.task_id.as_str()).collect()
  }

  #[test]
  fn test_sequential_creates_first_child() {
    let flow = flow(FLOW);
    let execution = execution(&flow, serde_json::json!({}));
    let tasks = resolve_tasks(&flow.tasks, None);

    let nexts = resolve_sequential_nexts(
      &execution,
      &tasks,
      &resolve_tasks(&flow.errors, None),
      &resolve_tasks(&flow.finally, None),
    );
    assert_eq!(ids(&nexts), vec!["a"]);
    assert_eq!(nexts[0].task_run.current(), StateType::Created);
  }

  #[test]
  fn test_sequential_waits_then_skips_disabled() {
    let flow = flow(FLOW);
    let mut execution = execution(&flow, serde_json::json!({}));
    let tasks = resolve_tasks(&flow.tasks, None);
    let errors = resolve_tasks(&flow.errors, None);
    let finally = resolve_tasks(&flow.finally, None);

    add_run(&mut execution, "a", None, None, StateType::Running);
    assert!(resolve_sequential_nexts(&execution, &tasks, &errors, &finally).is_empty());

    add_run(&mut execution, "b", None, None, StateType::Success);
    execution.task_runs[0].state.transition(StateType::Success);
    let nexts = resolve_sequential_nexts(&execution, &tasks, &errors, &finally);
    assert_eq!(ids(&nexts), vec!["c"]);
  }

  #[test]
  fn test_sequential_failure_goes_to_errors_then_finally() {
    let flow = flow(FLOW);
    let mut execution = execution(&flow, serde_json::json!({}));
    let tasks = resolve_tasks(&flow.tasks, None);
    let errors = resolve_tasks(&flow.errors, None);
    let finally = resolve_tasks(&flow.finally, None);

    add_run(&mut execution, "a", None, None, StateType::Failed);
    let nexts = resolve_sequential_nexts(&execution, &tasks, &errors, &finally);
    assert_eq!(ids(&nexts), vec!["on_error"]);

    add_run(&mut execution, "on_error", None, None, StateType::Success);
    let nexts = resolve_sequential_nexts(&execution, &tasks, &errors, &finally);
    assert_eq!(ids(&nexts), vec!["cleanup"]);

    add_run(&mut execution, "cleanup", None, None, StateType::Success);
    assert!(resolve_sequential_nexts(&execution, &tasks, &errors, &finally).is_empty());
  }

  #[test]
  fn test_nothing_scheduled_while_killing() {
    let flow = flow(FLOW);
    let mut execution = execution(&flow, serde_json::json!({}));
    execution.transition(StateType::Killing);

    let nexts = resolve_sequential_nexts(&execution, &resolve_tasks(&flow.tasks, None), &[], &[]);
    assert!(nexts.is_empty());
  }

  #[test]
  fn test_parallel_schedules_all_within_concurrency() {
    let flow = flow(FLOW);
    let mut execution = execution(&flow, serde_json::json!({}));
    let tasks = resolve_tasks(&flow.tasks, None);

    let all = resolve_parallel_nexts(&execution, &tasks, &[], &[], None);
    assert_eq!(ids(&all), vec!["a", "b", "c"]);

    add_run(&mut execution, "a", None, None, StateType::Running);
    let limited = resolve_parallel_nexts(&execution, &tasks, &[], &[], Some(2));
    assert_eq!(ids(&limited), vec!["b"]);
  }

  #[test]
  fn test_parallel_stops_scheduling_after_failure() {
    let flow = flow(FLOW);
    let mut execution = execution(&flow, serde_json::json!({}));
    let tasks = resolve_tasks(&flow.tasks, None);

    add_run(&mut execution, "a", None, None, StateType::Failed);
    add_run(&mut execution, "b", None, None, StateType::Running);
    assert!(resolve_parallel_nexts(&execution, &tasks, &[], &[], Some(1)).is_empty());
  }

  #[test]
  fn test_inherit_state() {
    let run = TaskRun::new("e", "if", None, None).with_state(StateType::Running);
    assert_eq!(inherit_state(&run, FailurePolicy::default()), StateType::Success);

    let failed = run.with_state(StateType::Failed);
    assert_eq!(inherit_state(&failed, FailurePolicy::default()), StateType::Failed);
    let allow = FailurePolicy {
      allow_failure: true,
      allow_warning: false,
    };
    assert_eq!(inherit_state(&failed, allow), StateType::Warning);
  }
}
