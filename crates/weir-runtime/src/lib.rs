//! Weir Runtime
//!
//! This crate implements the flowable-task contract: how composite tasks
//! (`if`, `sequential`, `parallel`, `for_each`) compute their children, the
//! next task runs to create, and their aggregated terminal state.
//!
//! # Architecture
//!
//! ```text
//! FlowableTask (trait)
//! ├── child_tasks(ctx, parent_run)              -> Vec<ResolvedTask>
//! ├── resolve_nexts(ctx, execution, parent_run) -> Vec<NextTaskRun>
//! ├── resolve_state(ctx, execution, parent_run) -> Option<StateType>
//! │     └── aggregate(outcomes, policy)          (pure)
//! ├── tasks_tree(execution, task_run, values)   -> GraphCluster
//! └── all_child_tasks()                         -> Vec<&TaskDef>
//! ```
//!
//! Conditions and loop values are rendered by [`RunContext`] with minijinja.
//! Nothing here performs I/O; callers record errors instead of crashing.

mod aggregate;
mod context;
mod error;
mod flowable;
pub mod graph;
mod resolved;
mod truth;
mod validate;

pub use aggregate::{ChildOutcome, FailurePolicy, Outcomes, aggregate, branch_failed, branch_settled};
pub use context::RunContext;
pub use error::RuntimeError;
pub use flowable::{
  EVALUATION_RESULT, FOR_EACH_VALUES, FlowableTask, ForEach, If, Parallel, Sequential, flowable,
  inherit_state, resolve_parallel_nexts, resolve_sequential_nexts, resolve_state,
};
pub use resolved::{ResolvedTask, resolve_tasks};
pub use truth::is_truthy;
pub use validate::{parse_flow, resolve_flow, resolve_source};
