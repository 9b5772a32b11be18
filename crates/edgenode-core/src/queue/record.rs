//! Task record: the task plus its queue bookkeeping.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{ErrorInfo, Task, TaskResult, TaskState};

/// Single source of truth for one task.
///
/// The bucket indexes in the queue hold ids only; state lives here.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    pub task: Task,
    pub state: TaskState,

    /// Admission score, fixed at enqueue unless rescored.
    pub score: f64,

    /// Enqueue sequence number, breaks score ties FIFO.
    pub seq: u64,

    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    pub result: Option<TaskResult>,
    pub error: Option<ErrorInfo>,
}

impl TaskRecord {
    pub fn new(task: Task, score: f64, seq: u64, now: DateTime<Utc>) -> Self {
        Self {
            task,
            state: TaskState::Waiting,
            score,
            seq,
            enqueued_at: now,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        }
    }

    pub fn start(&mut self, now: DateTime<Utc>) {
        self.state = TaskState::Running;
        self.started_at = Some(now);
    }

    pub fn finish(
        &mut self,
        state: TaskState,
        result: Option<TaskResult>,
        error: Option<ErrorInfo>,
        now: DateTime<Utc>,
    ) {
        self.state = state;
        self.result = result;
        self.error = error;
        self.finished_at = Some(now);
    }

    /// Wall time between admission and the terminal transition.
    pub fn run_time(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}
