//! Weir Execution
//!
//! This crate holds the canonical execution record that the executor advances
//! one event at a time:
//! - [`Execution`]: one run of a flow, with its ordered task runs
//! - [`TaskRun`]: one task's run instance, possibly repeated per loop value
//! - [`State`]: an append-only history of [`StateType`] transitions
//!
//! Everything here is plain data. Advancement rules live in `weir-runtime`
//! and `weir-executor`.

mod error;
mod execution;
mod state;
mod task_run;

pub use error::ExecutionError;
pub use execution::{Execution, NextTaskRun, ParentTaskRun};
pub use state::{State, StateHistory, StateType};
pub use task_run::TaskRun;
