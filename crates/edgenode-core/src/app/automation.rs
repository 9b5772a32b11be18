//! Heartbeat and task-pull loops.
//!
//! Both loops fire once right away, then sleep the interval read from the
//! shared config on every tick. Errors are reported as events and never end
//! a loop; only `stop()` does. Stopping cancels the sleep between ticks; a
//! tick already in progress runs to completion so pulled tasks are enqueued.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{EdgeConfig, SharedConfig};
use crate::domain::{EdgeEvent, NodeId};
use crate::error::{ClientError, QueueError};
use crate::pool::WorkerPool;
use crate::ports::{
    Capabilities, Coordinator, EventSink, Heartbeat, NodeLoad, PullRequest, ResourceProbe,
};
use crate::queue::TaskQueue;

/// Outcome of one pull tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    Pulled { received: usize, enqueued: usize },
    Skipped { waiting: usize },
}

pub(crate) struct AutomationDeps {
    pub coordinator: Arc<dyn Coordinator>,
    pub queue: Arc<TaskQueue>,
    pub pool: Arc<WorkerPool>,
    pub probe: Arc<dyn ResourceProbe>,
    pub config: SharedConfig,
    pub sink: Arc<dyn EventSink>,
    pub node_id: NodeId,
    pub capabilities: Capabilities,
}

struct Loops {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

pub struct AutomationService {
    deps: Arc<AutomationDeps>,
    loops: Mutex<Option<Loops>>,
}

impl AutomationService {
    pub(crate) fn new(deps: AutomationDeps) -> Self {
        Self {
            deps: Arc::new(deps),
            loops: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.loops.lock().is_some()
    }

    /// Start both loops. Returns `false` if they were already running.
    pub fn start(&self) -> bool {
        let mut loops = self.loops.lock();
        if loops.is_some() {
            return false;
        }

        let cancel = CancellationToken::new();
        let heartbeat = {
            let deps = Arc::clone(&self.deps);
            spawn_loop(
                cancel.clone(),
                self.deps.config.clone(),
                |c| c.automation.heartbeat_interval(),
                move || {
                    let deps = Arc::clone(&deps);
                    async move {
                        let _ = deps.heartbeat_once().await;
                    }
                },
            )
        };
        let pull = {
            let deps = Arc::clone(&self.deps);
            spawn_loop(
                cancel.clone(),
                self.deps.config.clone(),
                |c| c.automation.pull_interval(),
                move || {
                    let deps = Arc::clone(&deps);
                    async move {
                        let _ = deps.pull_once().await;
                    }
                },
            )
        };

        *loops = Some(Loops {
            cancel,
            handles: vec![heartbeat, pull],
        });
        drop(loops);
        self.deps.sink.emit(EdgeEvent::ServiceStarted);
        true
    }

    /// Stop both loops and wait for them to exit. Safe to call repeatedly.
    pub async fn stop(&self) {
        let Some(loops) = self.loops.lock().take() else {
            return;
        };
        loops.cancel.cancel();
        for handle in loops.handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "automation loop ended abnormally");
            }
        }
        self.deps.sink.emit(EdgeEvent::ServiceStopped);
    }

    /// Send one heartbeat now.
    pub async fn heartbeat_once(&self) -> Result<(), ClientError> {
        self.deps.heartbeat_once().await
    }

    /// Run one pull tick now.
    pub async fn pull_once(&self) -> Result<PullOutcome, ClientError> {
        self.deps.pull_once().await
    }
}

fn spawn_loop<F, Fut>(
    cancel: CancellationToken,
    config: SharedConfig,
    interval: fn(&EdgeConfig) -> Duration,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        while !cancel.is_cancelled() {
            tick().await;
            let wait = interval(&config.current());
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    })
}

impl AutomationDeps {
    async fn heartbeat_once(&self) -> Result<(), ClientError> {
        let counts = self.queue.counts().await;
        let sample = self.probe.sample();
        let max_concurrency = self.config.current().pool.max_concurrency;
        let status = if counts.running >= max_concurrency {
            "busy"
        } else {
            "online"
        };

        let heartbeat = Heartbeat {
            node_id: self.node_id.clone(),
            status: status.to_string(),
            load: NodeLoad {
                running: counts.running,
                waiting: counts.waiting,
                max_concurrency,
            },
            memory: sample.memory_mb,
            cpu: sample.cpu_percent,
            timestamp: chrono::Utc::now(),
        };

        match self.coordinator.heartbeat(&heartbeat).await {
            Ok(()) => {
                self.sink.emit(EdgeEvent::HeartbeatSent {
                    running: counts.running,
                    waiting: counts.waiting,
                });
                Ok(())
            }
            Err(err) => {
                if err.is_auth() {
                    warn!("heartbeat rejected: authentication required");
                }
                self.sink.emit(EdgeEvent::HeartbeatFailed {
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn pull_once(&self) -> Result<PullOutcome, ClientError> {
        let config = self.config.current();
        if let Some(limit) = config.automation.max_waiting_before_pull {
            let waiting = self.queue.waiting_count().await;
            if waiting >= limit {
                self.sink.emit(EdgeEvent::PullSkipped { waiting });
                return Ok(PullOutcome::Skipped { waiting });
            }
        }

        let request = PullRequest {
            node_id: self.node_id.clone(),
            capabilities: self.capabilities.clone(),
            max_tasks: config.automation.max_tasks_per_pull,
        };
        let tasks = match self.coordinator.pull_tasks(&request).await {
            Ok(tasks) => tasks,
            Err(err) => {
                if err.is_auth() {
                    warn!("task pull rejected: authentication required");
                }
                self.sink.emit(EdgeEvent::PullFailed {
                    error: err.to_string(),
                });
                return Err(err);
            }
        };

        let received = tasks.len();
        let mut enqueued = 0;
        for task in tasks {
            match self.queue.enqueue(task).await {
                Ok(()) => enqueued += 1,
                Err(QueueError::DuplicateTask(id)) => debug!(task_id = %id, "ignoring duplicate task"),
                Err(err) => warn!(error = %err, "could not enqueue pulled task"),
            }
        }

        self.sink.emit(EdgeEvent::TasksPulled { received, enqueued });
        if enqueued > 0 {
            self.pool.nudge();
        }
        Ok(PullOutcome::Pulled { received, enqueued })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::{Task, TaskId, TaskState};
    use crate::executor::{HandlerRegistry, TaskExecutor};
    use crate::impls::{FixedProbe, InMemoryCoordinator, MemoryEventSink};
    use crate::ports::{NodeRegistration, ResultSubmission, SystemClock};
    use crate::sandbox::ExecutionSandbox;

    /// Hands out tasks like the in-memory coordinator, but holds the
    /// response for `delay` after taking them.
    struct SlowPull {
        inner: Arc<InMemoryCoordinator>,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl Coordinator for SlowPull {
        async fn register_node(&self, registration: &NodeRegistration) -> Result<(), ClientError> {
            self.inner.register_node(registration).await
        }

        async fn heartbeat(&self, heartbeat: &Heartbeat) -> Result<(), ClientError> {
            self.inner.heartbeat(heartbeat).await
        }

        async fn pull_tasks(&self, request: &PullRequest) -> Result<Vec<Task>, ClientError> {
            let tasks = self.inner.pull_tasks(request).await?;
            tokio::time::sleep(self.delay).await;
            Ok(tasks)
        }

        async fn submit_result(&self, submission: &ResultSubmission) -> Result<(), ClientError> {
            self.inner.submit_result(submission).await
        }
    }

    struct Fixture {
        service: AutomationService,
        queue: Arc<TaskQueue>,
        coordinator: Arc<InMemoryCoordinator>,
        config: SharedConfig,
        sink: Arc<MemoryEventSink>,
    }

    fn fixture(edit: impl FnOnce(&mut EdgeConfig)) -> Fixture {
        fixture_with(edit, None)
    }

    fn fixture_with(edit: impl FnOnce(&mut EdgeConfig), pull_delay: Option<Duration>) -> Fixture {
        let mut cfg = EdgeConfig::default();
        cfg.automation.heartbeat_interval_ms = 20;
        cfg.automation.pull_interval_ms = 20;
        edit(&mut cfg);
        let config = SharedConfig::new(cfg);
        let sink = Arc::new(MemoryEventSink::new());
        let probe = Arc::new(FixedProbe::new(12.5, 300.0));
        let queue = Arc::new(TaskQueue::new(Arc::new(SystemClock), sink.clone()));
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let port: Arc<dyn Coordinator> = match pull_delay {
            Some(delay) => Arc::new(SlowPull {
                inner: coordinator.clone(),
                delay,
            }),
            None => coordinator.clone(),
        };

        // no handlers and no dispatcher: pulled tasks stay waiting
        let sandbox = ExecutionSandbox::new(config.clone(), probe.clone(), sink.clone());
        let executor = TaskExecutor::new(
            Arc::new(HandlerRegistry::new()),
            Arc::new(sandbox),
            Arc::new(SystemClock),
        );
        let pool = Arc::new(WorkerPool::new(
            queue.clone(),
            Arc::new(executor),
            port.clone(),
            NodeId::new("edge-a"),
            config.clone(),
            sink.clone(),
        ));

        let service = AutomationService::new(AutomationDeps {
            coordinator: port,
            queue: queue.clone(),
            pool,
            probe,
            config: config.clone(),
            sink: sink.clone(),
            node_id: NodeId::new("edge-a"),
            capabilities: Capabilities {
                cpu: 4,
                memory: 8.0,
                gpu: false,
                task_types: vec!["compute".into()],
            },
        });

        Fixture {
            service,
            queue,
            coordinator,
            config,
            sink,
        }
    }

    fn tasks(ids: &[&str]) -> Vec<Task> {
        ids.iter()
            .map(|id| Task::new(TaskId::new(*id), "compute", json!({})))
            .collect()
    }

    #[tokio::test]
    async fn both_loops_fire_immediately_and_repeat() {
        let f = fixture(|_| {});
        assert!(f.service.start());
        tokio::time::sleep(Duration::from_millis(100)).await;
        f.service.stop().await;

        assert!(f.coordinator.heartbeats().len() >= 2);
        assert!(f.coordinator.pulls().len() >= 2);
    }

    #[tokio::test]
    async fn first_tick_happens_before_the_interval() {
        let f = fixture(|c| {
            c.automation.heartbeat_interval_ms = 60_000;
            c.automation.pull_interval_ms = 60_000;
        });
        f.service.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.service.stop().await;

        assert_eq!(f.coordinator.heartbeats().len(), 1);
        assert_eq!(f.coordinator.pulls().len(), 1);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let f = fixture(|_| {});
        assert!(f.service.start());
        assert!(!f.service.start());
        assert!(f.service.is_running());

        f.service.stop().await;
        f.service.stop().await;
        assert!(!f.service.is_running());
        assert_eq!(f.sink.count("service_started"), 1);
        assert_eq!(f.sink.count("service_stopped"), 1);

        let after = f.coordinator.heartbeats().len();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(f.coordinator.heartbeats().len(), after);

        // restartable after a stop
        assert!(f.service.start());
        f.service.stop().await;
    }

    #[tokio::test]
    async fn heartbeat_reports_load_and_sample() {
        let f = fixture(|c| c.pool.max_concurrency = 1);
        f.queue.enqueue(tasks(&["w"]).remove(0)).await.unwrap();
        f.service.heartbeat_once().await.unwrap();

        let hb = f.coordinator.heartbeats().remove(0);
        assert_eq!(hb.status, "online");
        assert_eq!(hb.load.waiting, 1);
        assert_eq!(hb.load.max_concurrency, 1);
        assert_eq!(hb.cpu, 12.5);
        assert_eq!(hb.memory, 300.0);

        f.queue.admit_next().await.unwrap();
        f.service.heartbeat_once().await.unwrap();
        assert_eq!(f.coordinator.heartbeats()[1].status, "busy");
    }

    #[tokio::test]
    async fn pull_enqueues_and_ignores_duplicates() {
        let f = fixture(|c| c.automation.max_tasks_per_pull = 10);
        f.queue.enqueue(tasks(&["b"]).remove(0)).await.unwrap();
        f.coordinator.push_tasks(tasks(&["a", "b", "c"]));

        let outcome = f.service.pull_once().await.unwrap();
        assert_eq!(
            outcome,
            PullOutcome::Pulled {
                received: 3,
                enqueued: 2
            }
        );
        assert_eq!(f.queue.waiting_count().await, 3);
        assert_eq!(f.coordinator.pulls()[0].max_tasks, 10);
    }

    #[tokio::test]
    async fn backlog_guard_skips_pull() {
        let f = fixture(|c| c.automation.max_waiting_before_pull = Some(1));
        f.queue.enqueue(tasks(&["x"]).remove(0)).await.unwrap();
        f.coordinator.push_tasks(tasks(&["y"]));

        let outcome = f.service.pull_once().await.unwrap();
        assert_eq!(outcome, PullOutcome::Skipped { waiting: 1 });
        assert!(f.coordinator.pulls().is_empty());
        assert_eq!(f.sink.count("pull_skipped"), 1);
    }

    #[tokio::test]
    async fn loop_failures_are_reported_and_loops_survive() {
        let f = fixture(|_| {});
        f.coordinator.set_failing(true, true, false);
        f.service.start();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(f.service.is_running());
        assert!(f.sink.count("heartbeat_failed") >= 2);
        assert!(f.sink.count("pull_failed") >= 2);

        f.coordinator.set_failing(false, false, false);
        tokio::time::sleep(Duration::from_millis(60)).await;
        f.service.stop().await;
        assert!(!f.coordinator.heartbeats().is_empty());
    }

    #[tokio::test]
    async fn interval_is_reread_after_every_tick() {
        let f = fixture(|_| {});
        f.service.start();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(f.coordinator.heartbeats().len() >= 2);

        f.config
            .modify(|c| c.automation.heartbeat_interval_ms = 60_000)
            .unwrap();
        // at most one more tick on the old interval
        tokio::time::sleep(Duration::from_millis(40)).await;
        let settled = f.coordinator.heartbeats().len();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(f.coordinator.heartbeats().len(), settled);
        f.service.stop().await;
    }

    #[tokio::test]
    async fn stop_lets_an_in_progress_pull_enqueue_its_tasks() {
        let f = fixture_with(|_| {}, Some(Duration::from_millis(100)));
        f.coordinator.push_tasks(tasks(&["in-flight"]));
        f.service.start();

        // the pull has taken the task and is still waiting on the response
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(f.coordinator.pending(), 0);
        f.service.stop().await;

        assert_eq!(
            f.queue.state_of(&TaskId::new("in-flight")).await,
            Some(TaskState::Waiting)
        );
        assert_eq!(f.sink.count("tasks_pulled"), 1);
    }
}
