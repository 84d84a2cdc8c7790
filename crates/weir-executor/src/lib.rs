//! Weir Executor
//!
//! This crate advances executions in response to events. Each event gets one
//! [`Executor`] pass: the stored execution is joined with the event, advanced
//! by the [`ExecutorService`], saved with optimistic concurrency, and only
//! then are the pass's side effects emitted.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ExecutorRunner                         │
//! │  - owns mpsc channel of ExecutorCause events                │
//! │  - load → join → process → save (retry on conflict) → emit  │
//! │  - start(cancel) runs the event loop                        │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ExecutorService                         │
//! │  - join(executor): merge the event into the execution       │
//! │  - process(executor): start, create nexts, settle, end      │
//! │  - composites delegate to weir_runtime::FlowableTask        │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Executor                             │
//! │  - per-event accumulator: execution snapshot + requests     │
//! │  - worker tasks, delays, subflows, kills, seq id            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Side effects leave through a [`Dispatcher`]. The [`LocalWorker`] executes
//! leaf tasks in process and answers on the runner's channel.
//!
//! # Usage
//!
//! ```ignore
//! use weir_executor::{ChannelDispatcher, ExecutorRunner, LocalWorker};
//! use tokio_util::sync::CancellationToken;
//!
//! let (dispatcher, dispatches) = ChannelDispatcher::channel();
//! let runner = ExecutorRunner::new(store, flows, dispatcher);
//! let cancel = CancellationToken::new();
//!
//! tokio::spawn(LocalWorker::new().run(dispatches, runner.sender(), None, cancel.clone()));
//! runner.create_execution(&flow, inputs).await?;
//! runner.start(cancel).await;
//! ```

mod dispatch;
mod error;
mod events;
mod executor;
mod runner;
mod service;
mod worker;

pub use dispatch::{ChannelDispatcher, Dispatch, Dispatcher, NoopDispatcher};
pub use error::ExecutorError;
pub use events::{
  ExecutionDelay, ExecutionKilledExecution, ExecutionResumed, ExecutorCause, SubflowExecution,
  SubflowExecutionEnd, SubflowExecutionResult, WorkerJob, WorkerKill, WorkerTask, WorkerTaskResult,
  WorkerTrigger,
};
pub use executor::{Executor, SerializedExecutor};
pub use runner::{ExecutorRunner, RunnerConfig};
pub use service::{ExecutorService, SUBFLOW_EXECUTION_ID};
pub use worker::{LocalWorker, MESSAGE_OUTPUT};
