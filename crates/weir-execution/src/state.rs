use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle states shared by executions and task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateType {
  Created,
  Running,
  Paused,
  Restarted,
  Killing,
  Killed,
  Success,
  Warning,
  Failed,
}

impl StateType {
  /// No further transitions follow a terminal state.
  pub const fn is_terminal(self) -> bool {
    matches!(
      self,
      Self::Success | Self::Warning | Self::Failed | Self::Killed
    )
  }

  pub const fn is_created(self) -> bool {
    matches!(self, Self::Created)
  }

  pub const fn is_running(self) -> bool {
    matches!(self, Self::Running | Self::Restarted | Self::Killing)
  }

  pub const fn is_paused(self) -> bool {
    matches!(self, Self::Paused)
  }

  /// Failed or killed.
  pub const fn is_failed(self) -> bool {
    matches!(self, Self::Failed | Self::Killed)
  }

  /// Rank of a terminal outcome, worst is highest.
  ///
  /// Non-terminal states rank like a success.
  pub const fn severity(self) -> u8 {
    match self {
      Self::Killed => 3,
      Self::Failed => 2,
      Self::Warning => 1,
      _ => 0,
    }
  }

  /// The worse of two outcomes.
  pub fn worst(self, other: StateType) -> StateType {
    if other.severity() > self.severity() {
      other
    } else {
      self
    }
  }
}

impl fmt::Display for StateType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Created => "CREATED",
      Self::Running => "RUNNING",
      Self::Paused => "PAUSED",
      Self::Restarted => "RESTARTED",
      Self::Killing => "KILLING",
      Self::Killed => "KILLED",
      Self::Success => "SUCCESS",
      Self::Warning => "WARNING",
      Self::Failed => "FAILED",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateHistory {
  pub state: StateType,
  pub date: DateTime<Utc>,
}

/// Append-only transition history. The current state is the last entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
  histories: Vec<StateHistory>,
}

impl State {
  pub fn new() -> Self {
    Self::of(StateType::Created)
  }

  /// A history starting at `state`.
  pub fn of(state: StateType) -> Self {
    Self {
      histories: vec![StateHistory {
        state,
        date: Utc::now(),
      }],
    }
  }

  pub fn current(&self) -> StateType {
    self
      .histories
      .last()
      .map(|h| h.state)
      .unwrap_or(StateType::Created)
  }

  pub fn histories(&self) -> &[StateHistory] {
    &self.histories
  }

  /// Append a transition. Transitioning to the current state is a no-op so
  /// replaying the same change leaves the history untouched.
  pub fn transition(&mut self, state: StateType) {
    if self.current() == state {
      return;
    }
    self.histories.push(StateHistory {
      state,
      date: Utc::now(),
    });
  }

  pub fn is_terminal(&self) -> bool {
    self.current().is_terminal()
  }

  pub fn is_paused(&self) -> bool {
    self.current().is_paused()
  }

  pub fn is_running(&self) -> bool {
    self.current().is_running()
  }

  pub fn is_created(&self) -> bool {
    self.current().is_created()
  }
}

impl Default for State {
  fn default() -> Self {
    Self::new()
  }
}
