//! Coordinator port: the remote service that hands out tasks.
//!
//! The request types here are also the wire bodies (camelCase JSON), so an
//! HTTP implementation can post them as-is.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{ErrorInfo, NodeId, ResourceMetrics, Task, TaskId, TaskResult, TaskStatus};
use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub cpu: usize,
    /// Total memory in GB.
    pub memory: f64,
    pub gpu: bool,
    pub task_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRegistration {
    pub node_id: NodeId,
    pub hostname: String,
    pub platform: String,
    pub arch: String,
    pub cpu_cores: usize,
    /// Total memory in MB.
    pub memory_total: f64,
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeLoad {
    pub running: usize,
    pub waiting: usize,
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub node_id: NodeId,
    /// `online` when idle, `busy` when at capacity.
    pub status: String,
    pub load: NodeLoad,
    /// Used memory in MB.
    pub memory: f64,
    /// CPU usage in percent.
    pub cpu: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub node_id: NodeId,
    pub capabilities: Capabilities,
    pub max_tasks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSubmission {
    pub task_id: TaskId,
    pub node_id: NodeId,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub duration_ms: u64,
    pub metrics: ResourceMetrics,
    pub completed_at: DateTime<Utc>,
}

impl ResultSubmission {
    pub fn new(task_id: TaskId, node_id: NodeId, result: &TaskResult) -> Self {
        Self {
            task_id,
            node_id,
            status: result.status,
            result: result.output.clone(),
            error: result.error.clone(),
            duration_ms: result.duration_ms,
            metrics: result.metrics,
            completed_at: result.finished_at,
        }
    }
}

/// Everything the automation loops and the pool need from the coordinator.
#[async_trait]
pub trait Coordinator: Send + Sync {
    async fn register_node(&self, registration: &NodeRegistration) -> Result<(), ClientError>;

    async fn heartbeat(&self, heartbeat: &Heartbeat) -> Result<(), ClientError>;

    async fn pull_tasks(&self, request: &PullRequest) -> Result<Vec<Task>, ClientError>;

    async fn submit_result(&self, submission: &ResultSubmission) -> Result<(), ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_serializes_camel_case() {
        let result = TaskResult::completed(
            serde_json::json!({"ok": true}),
            42,
            ResourceMetrics::default(),
            Utc::now(),
        );
        let sub = ResultSubmission::new(TaskId::new("t-1"), NodeId::new("edge-1"), &result);
        let v = serde_json::to_value(&sub).unwrap();
        assert_eq!(v["taskId"], "t-1");
        assert_eq!(v["nodeId"], "edge-1");
        assert_eq!(v["status"], "completed");
        assert_eq!(v["durationMs"], 42);
        assert!(v.get("error").is_none());
        assert!(v.get("completedAt").is_some());
    }
}
