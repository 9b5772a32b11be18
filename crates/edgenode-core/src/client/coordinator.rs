use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::RetryingClient;
use crate::config::Endpoints;
use crate::domain::{Priority, Task, TaskHints, TaskId, TaskType};
use crate::error::ClientError;
use crate::ports::{Coordinator, Heartbeat, NodeRegistration, PullRequest, ResultSubmission};

const DEFAULT_TASK_TYPE: &str = "compute";

/// `Coordinator` over HTTP.
pub struct CoordinatorClient {
    client: Arc<RetryingClient>,
    endpoints: Endpoints,
}

impl CoordinatorClient {
    pub fn new(client: Arc<RetryingClient>, endpoints: Endpoints) -> Self {
        Self { client, endpoints }
    }

    pub fn client(&self) -> &Arc<RetryingClient> {
        &self.client
    }
}

#[async_trait]
impl Coordinator for CoordinatorClient {
    async fn register_node(&self, registration: &NodeRegistration) -> Result<(), ClientError> {
        let _: Value = self.client.post(&self.endpoints.register, registration).await?;
        Ok(())
    }

    async fn heartbeat(&self, heartbeat: &Heartbeat) -> Result<(), ClientError> {
        let _: Value = self.client.post(&self.endpoints.heartbeat, heartbeat).await?;
        Ok(())
    }

    async fn pull_tasks(&self, request: &PullRequest) -> Result<Vec<Task>, ClientError> {
        let body: Value = self.client.post(&self.endpoints.pull, request).await?;
        Ok(parse_pulled(&body))
    }

    async fn submit_result(&self, submission: &ResultSubmission) -> Result<(), ClientError> {
        let _: Value = self.client.post(&self.endpoints.submit, submission).await?;
        Ok(())
    }
}

/// Accepts `{data: {tasks: [...]}}`, `{data: [...]}` and `{tasks: [...]}`.
/// Entries that cannot be read as a task are skipped.
pub(crate) fn parse_pulled(body: &Value) -> Vec<Task> {
    let list = body
        .pointer("/data/tasks")
        .or_else(|| body.get("data").filter(|d| d.is_array()))
        .or_else(|| body.get("tasks"))
        .and_then(Value::as_array);

    let Some(list) = list else {
        debug!("pull response carried no task list");
        return Vec::new();
    };

    list.iter()
        .filter_map(|raw| match WireTask::deserialize(raw) {
            Ok(wire) => Some(wire.into_task()),
            Err(err) => {
                warn!(error = %err, "skipping malformed task from coordinator");
                None
            }
        })
        .collect()
}

/// Task as coordinators actually send it; field names vary by deployment.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTask {
    #[serde(alias = "taskId", alias = "fragmentId")]
    id: TaskId,

    #[serde(rename = "type", alias = "taskType", alias = "task_type", default)]
    task_type: Option<String>,

    #[serde(alias = "data", default)]
    payload: Value,

    #[serde(default)]
    priority: Option<Value>,

    #[serde(alias = "duration", default)]
    estimated_duration: Option<f64>,

    #[serde(alias = "reward", alias = "revenue", default)]
    estimated_revenue: Option<f64>,
}

impl WireTask {
    fn into_task(self) -> Task {
        let task_type = self
            .task_type
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TASK_TYPE.to_string());

        Task {
            id: self.id,
            task_type: TaskType::new(task_type),
            payload: self.payload,
            priority: self.priority.as_ref().map(wire_priority).unwrap_or_default(),
            hints: TaskHints::new(
                self.estimated_duration.unwrap_or(0.0),
                self.estimated_revenue.unwrap_or(0.0),
            ),
        }
    }
}

fn wire_priority(raw: &Value) -> Priority {
    match raw {
        Value::String(s) => Priority::parse_lenient(s),
        Value::Number(n) => match n.as_f64() {
            Some(v) if v >= 3.0 => Priority::High,
            Some(v) if v <= 1.0 => Priority::Low,
            _ => Priority::Medium,
        },
        _ => Priority::Medium,
    }
}
