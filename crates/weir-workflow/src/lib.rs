//! Weir Workflow
//!
//! This crate provides the resolved flow representation for Weir.
//! A resolved flow is a validated form of a flow definition that the executor
//! can advance.
//!
//! Key differences from `weir-config`:
//! - Task ids are unique across every branch of every composite task
//! - Composite tasks carry the children they need (`if` has a `then` branch)
//! - A definition that fails to parse or validate is still represented, as
//!   [`FlowSource::Invalid`], so executions of it can be recognised and skipped
//!
//! The [`graph`] module holds the structural graph types emitted for
//! visualization. They have no bearing on execution.

mod error;
mod flow;
pub mod graph;

pub use error::WorkflowError;
pub use flow::{Flow, FlowSource, InvalidFlow};
pub use graph::{GraphCluster, GraphEdge, GraphNode, GraphTask, GraphTaskRun, RelationType};
