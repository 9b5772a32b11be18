//! EdgeRuntime: the assembled node.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::automation::AutomationService;
use super::status::{NodeStatus, TaskStatistics};
use crate::client::RetryingClient;
use crate::config::{EdgeConfig, SharedConfig};
use crate::domain::{EdgeEvent, NodeId, Task};
use crate::error::{ClientError, ConfigError, QueueError};
use crate::executor::TaskExecutor;
use crate::pool::WorkerPool;
use crate::ports::{Capabilities, Coordinator, EventSink, NodeRegistration, ResourceProbe};
use crate::queue::{QueueSnapshot, TaskQueue};

pub struct EdgeRuntime {
    pub(super) node_id: NodeId,
    pub(super) config: SharedConfig,
    pub(super) queue: Arc<TaskQueue>,
    pub(super) pool: Arc<WorkerPool>,
    pub(super) executor: Arc<TaskExecutor>,
    pub(super) automation: AutomationService,
    pub(super) coordinator: Arc<dyn Coordinator>,
    pub(super) client: Option<Arc<RetryingClient>>,
    pub(super) probe: Arc<dyn ResourceProbe>,
    pub(super) sink: Arc<dyn EventSink>,
    pub(super) capabilities: Capabilities,
    pub(super) handler_types: Vec<String>,
    pub(super) dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl EdgeRuntime {
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    pub fn automation(&self) -> &AutomationService {
        &self.automation
    }

    /// The HTTP client, when the coordinator is the built-in HTTP one.
    pub fn client(&self) -> Option<&Arc<RetryingClient>> {
        self.client.as_ref()
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Start the pool dispatcher and the automation loops.
    ///
    /// Returns `false` when already started, or after `shutdown`: a runtime
    /// that was shut down does not pull or admit tasks again.
    pub fn start(&self) -> bool {
        let mut dispatcher = self.dispatcher.lock();
        if dispatcher.is_some() || self.is_shut_down() {
            return false;
        }
        *dispatcher = Some(self.pool.spawn_dispatcher());
        drop(dispatcher);
        self.automation.start();
        info!(node_id = %self.node_id, "edge node started");
        true
    }

    /// Run only the dispatcher, without heartbeat or pulling. Tasks come in
    /// through `submit`.
    pub fn start_local(&self) -> bool {
        let mut dispatcher = self.dispatcher.lock();
        if dispatcher.is_some() || self.is_shut_down() {
            return false;
        }
        *dispatcher = Some(self.pool.spawn_dispatcher());
        true
    }

    fn is_shut_down(&self) -> bool {
        if self.pool.is_draining() {
            warn!(node_id = %self.node_id, "runtime was shut down; not starting again");
            return true;
        }
        false
    }

    /// Stop the loops, stop admitting and wait up to `grace` for in-flight
    /// executions. Returns `false` if the grace period ran out.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.automation.stop().await;

        let drained = tokio::time::timeout(grace, self.pool.drain()).await.is_ok();
        if !drained {
            warn!(
                in_flight = self.pool.in_flight(),
                "shutdown grace period elapsed with tasks still running"
            );
        }

        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "pool dispatcher ended abnormally");
            }
        }
        info!(node_id = %self.node_id, "edge node stopped");
        drained
    }

    /// Enqueue a task locally, as if it had been pulled.
    pub async fn submit(&self, task: Task) -> Result<(), QueueError> {
        self.queue.enqueue(task).await?;
        self.pool.nudge();
        Ok(())
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        self.queue.snapshot().await
    }

    pub async fn statistics(&self) -> TaskStatistics {
        TaskStatistics::from_snapshot(&self.queue.snapshot().await)
    }

    pub async fn status(&self) -> NodeStatus {
        NodeStatus {
            node_id: self.node_id.clone(),
            automation_running: self.automation.is_running(),
            max_concurrency: self.pool.max_concurrency(),
            counts: self.queue.counts().await,
            in_flight: self.pool.in_flight(),
            active_sessions: self.executor.sandbox().active_count(),
            handler_types: self.handler_types.clone(),
        }
    }

    /// Validate and publish a new configuration. Intervals, limits and the
    /// concurrency bound take effect on their next read; API settings are
    /// fixed at build time.
    pub fn reload_config(&self, config: EdgeConfig) -> Result<(), ConfigError> {
        self.config.update(config)?;
        self.sink.emit(EdgeEvent::ConfigReloaded);
        Ok(())
    }

    /// Announce this node to the coordinator.
    pub async fn register_node(&self) -> Result<(), ClientError> {
        let host = self.probe.host_info();
        let registration = NodeRegistration {
            node_id: self.node_id.clone(),
            hostname: host.hostname,
            platform: host.platform,
            arch: host.arch,
            cpu_cores: host.cpu_cores,
            memory_total: host.memory_total_mb,
            capabilities: self.capabilities.clone(),
        };
        self.coordinator.register_node(&registration).await?;
        self.sink.emit(EdgeEvent::NodeRegistered {
            node_id: self.node_id.clone(),
        });
        Ok(())
    }

    /// Log in through the HTTP client and keep the token for later requests.
    pub async fn login(&self, email: &str, password: &str) -> Result<String, ClientError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| ClientError::Build("runtime has no HTTP coordinator".into()))?;
        client.login(email, password).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::app::EdgeBuilder;
    use crate::domain::{TaskId, TaskState};
    use crate::impls::{FixedProbe, InMemoryCoordinator, MemoryEventSink};

    fn runtime(coordinator: Arc<InMemoryCoordinator>, sink: Arc<MemoryEventSink>) -> EdgeRuntime {
        let mut config = EdgeConfig::default();
        config.automation.heartbeat_interval_ms = 50;
        config.automation.pull_interval_ms = 50;
        EdgeBuilder::new()
            .config(config)
            .coordinator(coordinator)
            .event_sink(sink)
            .probe(Arc::new(FixedProbe::new(3.0, 64.0)))
            .node_id(NodeId::new("edge-rt"))
            .with_builtin()
            .unwrap()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn submit_runs_locally_and_reports() {
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let sink = Arc::new(MemoryEventSink::new());
        let rt = runtime(coordinator.clone(), sink);
        assert!(rt.start_local());

        rt.submit(Task::new(
            TaskId::new("h1"),
            "hash_calculation",
            json!({"input": "abc", "iterations": 3}),
        ))
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while coordinator.results().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(rt.queue().state_of(&TaskId::new("h1")).await, Some(TaskState::Completed));
        let stats = rt.statistics().await;
        assert_eq!(stats.success_rate, 1.0);
        assert!(rt.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn start_is_idempotent_and_shutdown_stops_loops() {
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let sink = Arc::new(MemoryEventSink::new());
        let rt = runtime(coordinator.clone(), sink.clone());

        assert!(rt.start());
        assert!(!rt.start());
        assert!(rt.status().await.automation_running);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(rt.shutdown(Duration::from_secs(1)).await);
        assert!(!rt.status().await.automation_running);
        assert_eq!(sink.count("service_stopped"), 1);
    }

    #[tokio::test]
    async fn runtime_does_not_restart_after_shutdown() {
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let sink = Arc::new(MemoryEventSink::new());
        let rt = runtime(coordinator.clone(), sink.clone());

        assert!(rt.start());
        assert!(rt.shutdown(Duration::from_secs(1)).await);
        let heartbeats = coordinator.heartbeats().len();

        coordinator.push_tasks([Task::new(TaskId::new("late"), "compute", json!({}))]);
        assert!(!rt.start());
        assert!(!rt.start_local());
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(!rt.automation().is_running());
        assert_eq!(coordinator.pending(), 1);
        assert_eq!(coordinator.heartbeats().len(), heartbeats);
        assert_eq!(rt.queue().waiting_count().await, 0);
        assert_eq!(sink.count("service_started"), 1);
    }

    #[tokio::test]
    async fn register_node_sends_host_facts() {
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let rt = runtime(coordinator.clone(), Arc::new(MemoryEventSink::new()));
        rt.register_node().await.unwrap();

        let reg = coordinator.registrations().remove(0);
        assert_eq!(reg.node_id.as_str(), "edge-rt");
        assert_eq!(reg.hostname, "fixed-host");
        assert_eq!(reg.capabilities.memory, 8.0);
    }

    #[tokio::test]
    async fn reload_rejects_invalid_config_and_keeps_the_old_one() {
        let sink = Arc::new(MemoryEventSink::new());
        let rt = runtime(Arc::new(InMemoryCoordinator::new()), sink.clone());

        let mut bad = rt.config().current();
        bad.pool.max_concurrency = 0;
        assert!(rt.reload_config(bad).is_err());
        assert_eq!(rt.pool().max_concurrency(), 4);

        let mut good = rt.config().current();
        good.pool.max_concurrency = 8;
        rt.reload_config(good).unwrap();
        assert_eq!(rt.status().await.max_concurrency, 8);
        assert_eq!(sink.count("config_reloaded"), 1);
    }

    #[tokio::test]
    async fn login_without_http_client_is_an_error() {
        let rt = runtime(Arc::new(InMemoryCoordinator::new()), Arc::new(MemoryEventSink::new()));
        assert!(rt.login("a@b.c", "x").await.is_err());
    }
}
