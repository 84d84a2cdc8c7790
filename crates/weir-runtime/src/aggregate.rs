//! State aggregation for composite tasks.
//!
//! A composite's outcome is a pure function of its children's outcomes per
//! branch (primary, errors, finally) and of its failure policy.

use weir_config::TaskDef;
use weir_execution::{StateType, TaskRun};

/// How a child's bad outcome affects its parent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailurePolicy {
  pub allow_failure: bool,
  pub allow_warning: bool,
}

impl FailurePolicy {
  pub fn of(task: &TaskDef) -> Self {
    Self {
      allow_failure: task.allow_failure,
      allow_warning: task.allow_warning,
    }
  }

  /// Downgrade an outcome according to the policy.
  ///
  /// A failure allowed by `allow_failure` is reported as a warning. A warning
  /// reported by the children themselves is reported as a success when
  /// `allow_warning` is set. The two do not chain.
  pub fn apply(self, state: StateType) -> StateType {
    match state {
      StateType::Failed if self.allow_failure => StateType::Warning,
      StateType::Warning if self.allow_warning => StateType::Success,
      other => other,
    }
  }
}

/// Outcome of one expected child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildOutcome {
  /// No run exists yet.
  NotCreated,
  /// A run exists and has not finished.
  Pending(StateType),
  /// A run reached a terminal state.
  Done(StateType),
}

impl ChildOutcome {
  pub fn of(task_run: Option<&TaskRun>) -> Self {
    match task_run {
      None => Self::NotCreated,
      Some(run) if run.state.is_terminal() => Self::Done(run.current()),
      Some(run) => Self::Pending(run.current()),
    }
  }

  fn is_failed(self) -> bool {
    matches!(self, Self::Done(state) if state.is_failed())
  }
}

/// Child outcomes grouped by branch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcomes {
  pub primary: Vec<ChildOutcome>,
  pub errors: Vec<ChildOutcome>,
  pub finally: Vec<ChildOutcome>,
}

/// Whether any child of the branch failed or was killed.
pub fn branch_failed(branch: &[ChildOutcome]) -> bool {
  branch.iter().any(|o| o.is_failed())
}

/// A branch is settled when every child is done, or when a child failed and
/// nothing is still running: children after a failure are never created.
pub fn branch_settled(branch: &[ChildOutcome]) -> bool {
  if branch.iter().all(|o| matches!(o, ChildOutcome::Done(_))) {
    return true;
  }
  branch_failed(branch) && !branch.iter().any(|o| matches!(o, ChildOutcome::Pending(_)))
}

/// Combine branch outcomes into one terminal state.
///
/// Returns `None` while the primary branch, the error branch (when a primary
/// child failed) or the finally branch is still pending. Precedence is
/// KILLED > FAILED > WARNING > SUCCESS across all of them, so a finally branch
/// can downgrade a success but never upgrade a failure.
pub fn aggregate(outcomes: &Outcomes, policy: FailurePolicy) -> Option<StateType> {
  if !branch_settled(&outcomes.primary) {
    return None;
  }

  let primary_failed = branch_failed(&outcomes.primary);
  if primary_failed && !branch_settled(&outcomes.errors) {
    return None;
  }

  if !branch_settled(&outcomes.finally) {
    return None;
  }

  let errors: &[ChildOutcome] = if primary_failed { &outcomes.errors } else { &[] };
  let worst = outcomes
    .primary
    .iter()
    .chain(errors)
    .chain(&outcomes.finally)
    .filter_map(|o| match o {
      ChildOutcome::Done(state) => Some(*state),
      _ => None,
    })
    .fold(StateType::Success, StateType::worst);

  Some(policy.apply(worst))
}

#[cfg(test)]
mod tests {
  use super::*;
  use ChildOutcome::*;
  use StateType::*;

  fn primary(children: Vec<ChildOutcome>) -> Outcomes {
    Outcomes {
      primary: children,
      ..Default::default()
    }
  }

  fn policy(allow_failure: bool, allow_warning: bool) -> FailurePolicy {
    FailurePolicy {
      allow_failure,
      allow_warning,
    }
  }

  #[test]
  fn test_all_success() {
    let outcomes = primary(vec![Done(Success), Done(Success)]);
    assert_eq!(aggregate(&outcomes, FailurePolicy::default()), Some(Success));
  }

  #[test]
  fn test_failure_not_allowed() {
    let outcomes = primary(vec![Done(Failed)]);
    assert_eq!(aggregate(&outcomes, policy(false, false)), Some(Failed));
  }

  #[test]
  fn test_failure_allowed() {
    let outcomes = primary(vec![Done(Failed)]);
    assert_eq!(aggregate(&outcomes, policy(true, false)), Some(Warning));
    assert_eq!(aggregate(&outcomes, policy(true, true)), Some(Warning));
  }

  #[test]
  fn test_warning_allowed() {
    let outcomes = primary(vec![Done(Success), Done(Warning)]);
    assert_eq!(aggregate(&outcomes, policy(false, false)), Some(Warning));
    assert_eq!(aggregate(&outcomes, policy(false, true)), Some(Success));
  }

  #[test]
  fn test_failed_finally_over_success() {
    let outcomes = Outcomes {
      primary: vec![Done(Success)],
      errors: vec![],
      finally: vec![Done(Failed)],
    };
    assert_eq!(aggregate(&outcomes, FailurePolicy::default()), Some(Failed));
  }

  #[test]
  fn test_successful_finally_does_not_upgrade() {
    let outcomes = Outcomes {
      primary: vec![Done(Failed)],
      errors: vec![],
      finally: vec![Done(Success)],
    };
    assert_eq!(aggregate(&outcomes, FailurePolicy::default()), Some(Failed));
  }

  #[test]
  fn test_pending_children() {
    assert_eq!(aggregate(&primary(vec![Done(Success), NotCreated]), FailurePolicy::default()), None);
    assert_eq!(aggregate(&primary(vec![Pending(Running)]), FailurePolicy::default()), None);
    assert_eq!(
      aggregate(&primary(vec![Done(Failed), Pending(Running)]), FailurePolicy::default()),
      None
    );
  }

  #[test]
  fn test_children_after_failure_are_abandoned() {
    let outcomes = primary(vec![Done(Success), Done(Failed), NotCreated]);
    assert_eq!(aggregate(&outcomes, FailurePolicy::default()), Some(Failed));
  }

  #[test]
  fn test_errors_branch_waits_only_after_failure() {
    let waiting = Outcomes {
      primary: vec![Done(Failed)],
      errors: vec![NotCreated],
      finally: vec![],
    };
    assert_eq!(aggregate(&waiting, FailurePolicy::default()), None);

    let untriggered = Outcomes {
      primary: vec![Done(Success)],
      errors: vec![NotCreated],
      finally: vec![],
    };
    assert_eq!(aggregate(&untriggered, FailurePolicy::default()), Some(Success));

    let handled = Outcomes {
      primary: vec![Done(Failed)],
      errors: vec![Done(Success)],
      finally: vec![],
    };
    assert_eq!(aggregate(&handled, FailurePolicy::default()), Some(Failed));
  }

  #[test]
  fn test_finally_waits() {
    let outcomes = Outcomes {
      primary: vec![Done(Success)],
      errors: vec![],
      finally: vec![NotCreated],
    };
    assert_eq!(aggregate(&outcomes, FailurePolicy::default()), None);
  }

  #[test]
  fn test_killed_is_never_suppressed() {
    let outcomes = primary(vec![Done(Killed), Done(Failed)]);
    assert_eq!(aggregate(&outcomes, policy(true, true)), Some(Killed));
  }

  #[test]
  fn test_empty_primary_is_success() {
    assert_eq!(aggregate(&Outcomes::default(), FailurePolicy::default()), Some(Success));
  }
}
