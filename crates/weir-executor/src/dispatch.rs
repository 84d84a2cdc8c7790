//! Side effects leaving the runner once an execution is saved.
//!
//! Workers, schedulers and observers receive [`Dispatch`] messages. The runner
//! only calls `dispatch` after the pass that produced a message was persisted.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use weir_execution::Execution;

use crate::events::{ExecutionDelay, WorkerKill, WorkerTask, WorkerTrigger};

/// Messages emitted by the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Dispatch {
  /// A leaf task run to execute.
  WorkerTask(WorkerTask),

  /// A trigger to evaluate.
  WorkerTrigger(WorkerTrigger),

  /// A running task run to stop.
  WorkerKill(WorkerKill),

  /// A paused execution to resume later. The runner schedules the resume
  /// itself; this is for observers.
  ExecutionDelay(ExecutionDelay),

  /// The saved execution after a pass changed it.
  ExecutionUpdated(Execution),
}

/// Receiver of runner side effects.
///
/// Implementations decide where messages go (a worker pool, a queue, a UI).
pub trait Dispatcher: Send + Sync {
  fn dispatch(&self, message: Dispatch);
}

/// Discards every message.
#[derive(Debug, Clone, Default)]
pub struct NoopDispatcher;

impl Dispatcher for NoopDispatcher {
  fn dispatch(&self, _message: Dispatch) {}
}

/// Sends messages to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
  // Unbounded so a slow worker never blocks a pass.
  sender: mpsc::UnboundedSender<Dispatch>,
}

impl ChannelDispatcher {
  pub fn new(sender: mpsc::UnboundedSender<Dispatch>) -> Self {
    Self { sender }
  }

  /// A dispatcher and the receiving end of its channel.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<Dispatch>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self::new(sender), receiver)
  }
}

impl Dispatcher for ChannelDispatcher {
  fn dispatch(&self, message: Dispatch) {
    // The receiver may have been dropped on shutdown.
    let _ = self.sender.send(message);
  }
}
