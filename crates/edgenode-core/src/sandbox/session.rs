use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{ResourceMetrics, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl SessionStatus {
    pub fn is_active(self) -> bool {
        matches!(self, SessionStatus::Created | SessionStatus::Running)
    }
}

/// Bounded execution context for one handler run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SandboxSession {
    pub task_id: TaskId,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub metrics: ResourceMetrics,
    /// Distinguishes a session from a later one reusing the same task id,
    /// so a delayed teardown never removes its successor.
    #[serde(skip)]
    pub(crate) generation: u64,
}

impl SandboxSession {
    pub(crate) fn new(task_id: TaskId, generation: u64) -> Self {
        Self {
            task_id,
            status: SessionStatus::Created,
            created_at: Utc::now(),
            finished_at: None,
            metrics: ResourceMetrics::default(),
            generation,
        }
    }
}
