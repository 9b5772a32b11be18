//! Task state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which bucket a task currently lives in.
///
/// State transitions:
/// - Waiting -> Running -> Completed
/// - Waiting -> Running -> Failed
///
/// Terminal states are final. A retry is a new enqueue after the terminal
/// record has been evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Enqueued, eligible for admission.
    Waiting,

    /// Admitted by the pool and executing in a sandbox.
    Running,

    /// Handler returned a value.
    Completed,

    /// Handler failed, panicked, timed out, or no handler was registered.
    Failed,
}

impl TaskState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Waiting, TaskState::Running)
                | (TaskState::Running, TaskState::Completed)
                | (TaskState::Running, TaskState::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Waiting => "waiting",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
