//! Outcome model: the normalized result reported for every finished task.
//!
//! Architecture-agnostic: nothing here knows about the pool, the sandbox or
//! HTTP. It only defines the shape of what gets stored in the terminal
//! buckets and submitted to the coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TaskError;

/// Terminal status as reported to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// Serializable failure description stored in the failed bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<&TaskError> for ErrorInfo {
    fn from(err: &TaskError) -> Self {
        let kind = match err {
            TaskError::UnsupportedTaskType(_) => "unsupported_task_type",
            TaskError::Timeout(_) => "timeout",
            TaskError::Handler(_) => "handler_error",
            TaskError::Panicked(_) => "panicked",
            TaskError::ResourceLimitExceeded { .. } => "resource_limit_exceeded",
            TaskError::SessionConflict(_) => "session_conflict",
        };
        Self::new(kind, err.to_string())
    }
}

impl From<TaskError> for ErrorInfo {
    fn from(err: TaskError) -> Self {
        Self::from(&err)
    }
}

/// Resource accounting for one execution.
///
/// `cpu_percent`/`memory_mb` are the last sample; peaks are the maxima seen
/// while the session was running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetrics {
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub peak_cpu_percent: f64,
    pub peak_memory_mb: f64,
    pub samples: u32,
    pub estimated_earnings: f64,
}

impl ResourceMetrics {
    pub fn record(&mut self, cpu_percent: f64, memory_mb: f64) {
        self.cpu_percent = cpu_percent;
        self.memory_mb = memory_mb;
        self.peak_cpu_percent = self.peak_cpu_percent.max(cpu_percent);
        self.peak_memory_mb = self.peak_memory_mb.max(memory_mb);
        self.samples += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: TaskStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,

    pub duration_ms: u64,
    pub metrics: ResourceMetrics,
    pub finished_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn completed(
        output: Value,
        duration_ms: u64,
        metrics: ResourceMetrics,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            status: TaskStatus::Completed,
            output: Some(output),
            error: None,
            duration_ms,
            metrics,
            finished_at,
        }
    }

    pub fn failed(
        error: ErrorInfo,
        duration_ms: u64,
        metrics: ResourceMetrics,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            status: TaskStatus::Failed,
            output: None,
            error: Some(error),
            duration_ms,
            metrics,
            finished_at,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::TaskType;

    #[test]
    fn error_info_kinds_follow_task_error() {
        let info = ErrorInfo::from(TaskError::Timeout(Duration::from_millis(100)));
        assert_eq!(info.kind, "timeout");
        assert!(info.message.contains("100ms"));

        let info = ErrorInfo::from(TaskError::UnsupportedTaskType(TaskType::new("x")));
        assert_eq!(info.kind, "unsupported_task_type");
    }

    #[test]
    fn metrics_track_peaks() {
        let mut m = ResourceMetrics::default();
        m.record(40.0, 100.0);
        m.record(90.0, 50.0);
        m.record(10.0, 70.0);
        assert_eq!(m.cpu_percent, 10.0);
        assert_eq!(m.peak_cpu_percent, 90.0);
        assert_eq!(m.peak_memory_mb, 100.0);
        assert_eq!(m.samples, 3);
    }

    #[test]
    fn failed_result_omits_output_when_serialized() {
        let r = TaskResult::failed(
            ErrorInfo::new("handler_error", "boom"),
            12,
            ResourceMetrics::default(),
            Utc::now(),
        );
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["status"], "failed");
        assert!(v.get("output").is_none());
        assert_eq!(v["error"]["kind"], "handler_error");
    }
}
