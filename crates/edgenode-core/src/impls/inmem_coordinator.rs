//! In-process coordinator: hands out preloaded tasks and records what the
//! node reports back.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::Task;
use crate::error::ClientError;
use crate::ports::{Coordinator, Heartbeat, NodeRegistration, PullRequest, ResultSubmission};

#[derive(Debug, Default)]
struct Inner {
    pending: VecDeque<Task>,
    registrations: Vec<NodeRegistration>,
    heartbeats: Vec<Heartbeat>,
    pulls: Vec<PullRequest>,
    results: Vec<ResultSubmission>,
    fail_heartbeats: bool,
    fail_pulls: bool,
    fail_submits: bool,
}

#[derive(Debug, Default)]
pub struct InMemoryCoordinator {
    inner: Mutex<Inner>,
}

impl InMemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        let coordinator = Self::new();
        coordinator.push_tasks(tasks);
        coordinator
    }

    pub fn push_tasks(&self, tasks: impl IntoIterator<Item = Task>) {
        self.inner.lock().pending.extend(tasks);
    }

    pub fn pending(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn registrations(&self) -> Vec<NodeRegistration> {
        self.inner.lock().registrations.clone()
    }

    pub fn heartbeats(&self) -> Vec<Heartbeat> {
        self.inner.lock().heartbeats.clone()
    }

    pub fn pulls(&self) -> Vec<PullRequest> {
        self.inner.lock().pulls.clone()
    }

    pub fn results(&self) -> Vec<ResultSubmission> {
        self.inner.lock().results.clone()
    }

    /// Make every later heartbeat/pull/submit fail with a transport error.
    pub fn set_failing(&self, heartbeats: bool, pulls: bool, submits: bool) {
        let mut inner = self.inner.lock();
        inner.fail_heartbeats = heartbeats;
        inner.fail_pulls = pulls;
        inner.fail_submits = submits;
    }
}

fn unavailable() -> ClientError {
    ClientError::Transport {
        attempts: 1,
        message: "coordinator unavailable".to_string(),
    }
}

#[async_trait]
impl Coordinator for InMemoryCoordinator {
    async fn register_node(&self, registration: &NodeRegistration) -> Result<(), ClientError> {
        self.inner.lock().registrations.push(registration.clone());
        Ok(())
    }

    async fn heartbeat(&self, heartbeat: &Heartbeat) -> Result<(), ClientError> {
        let mut inner = self.inner.lock();
        if inner.fail_heartbeats {
            return Err(unavailable());
        }
        inner.heartbeats.push(heartbeat.clone());
        Ok(())
    }

    async fn pull_tasks(&self, request: &PullRequest) -> Result<Vec<Task>, ClientError> {
        let mut inner = self.inner.lock();
        if inner.fail_pulls {
            return Err(unavailable());
        }
        inner.pulls.push(request.clone());
        let n = request.max_tasks.min(inner.pending.len());
        Ok(inner.pending.drain(..n).collect())
    }

    async fn submit_result(&self, submission: &ResultSubmission) -> Result<(), ClientError> {
        let mut inner = self.inner.lock();
        if inner.fail_submits {
            return Err(unavailable());
        }
        inner.results.push(submission.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NodeId, TaskId};
    use crate::ports::Capabilities;

    fn request(max_tasks: usize) -> PullRequest {
        PullRequest {
            node_id: NodeId::new("edge-1"),
            capabilities: Capabilities {
                cpu: 1,
                memory: 1.0,
                gpu: false,
                task_types: vec![],
            },
            max_tasks,
        }
    }

    #[tokio::test]
    async fn pull_hands_out_at_most_max_tasks_in_order() {
        let tasks = (0..5).map(|i| Task::new(TaskId::new(format!("t{i}")), "compute", serde_json::json!({})));
        let coordinator = InMemoryCoordinator::with_tasks(tasks);

        let first = coordinator.pull_tasks(&request(2)).await.unwrap();
        let ids: Vec<&str> = first.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t0", "t1"]);
        assert_eq!(coordinator.pending(), 3);
        assert_eq!(coordinator.pulls().len(), 1);
    }

    #[tokio::test]
    async fn failing_mode_returns_transport_errors() {
        let coordinator = InMemoryCoordinator::new();
        coordinator.set_failing(false, true, false);
        assert!(coordinator.pull_tasks(&request(1)).await.is_err());
        assert!(coordinator.pulls().is_empty());
    }
}
