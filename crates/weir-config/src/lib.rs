//! Weir Config
//!
//! This crate contains the serializable flow definition types for Weir.
//! These types represent flows before they are validated and resolved
//! by `weir-workflow`.
//!
//! Definitions are loaded from:
//! - JSON files (via the CLI, `weir run flow.json`)
//! - A flow repository (as JSON blobs)
//!
//! Composite tasks (`if`, `sequential`, `parallel`, `for_each`) nest further
//! task definitions; the runtime turns them into child task runs.

mod expression;
mod flow;
mod flow_ref;
mod task;

pub use expression::Expression;
pub use flow::FlowDef;
pub use flow_ref::FlowRef;
pub use task::{
  FailTask, ForEachTask, IfTask, LogLevel, LogTask, ParallelTask, PauseTask, SequentialTask,
  SubflowTask, TaskDef, TaskKind,
};
