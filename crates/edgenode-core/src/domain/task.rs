use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::TaskId;

/// Task-type tag. Open-ended: any string a handler is registered under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Priority class assigned by the coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn weight(self) -> u32 {
        match self {
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }

    /// Lenient parse for wire values; unknown strings fall back to medium.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" | "urgent" => Priority::High,
            "low" => Priority::Low,
            _ => Priority::Medium,
        }
    }
}

/// Scheduling hints. Missing values count as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskHints {
    #[serde(default)]
    pub estimated_duration: f64,
    #[serde(default)]
    pub estimated_revenue: f64,
}

impl TaskHints {
    pub fn new(estimated_duration: f64, estimated_revenue: f64) -> Self {
        Self {
            estimated_duration,
            estimated_revenue,
        }
    }
}

/// A unit of remotely assigned work.
///
/// Owned by the queue once enqueued. Handlers only ever see a clone of
/// `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: TaskType,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub hints: TaskHints,
}

impl Task {
    pub fn new(id: TaskId, task_type: impl Into<TaskType>, payload: Value) -> Self {
        Self {
            id,
            task_type: task_type.into(),
            payload,
            priority: Priority::default(),
            hints: TaskHints::default(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_hints(mut self, estimated_duration: f64, estimated_revenue: f64) -> Self {
        self.hints = TaskHints::new(estimated_duration, estimated_revenue);
        self
    }
}
