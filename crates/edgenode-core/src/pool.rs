//! Worker pool: admits waiting tasks up to the concurrency limit and runs
//! each one to a submitted result.
//!
//! There is no fixed set of worker tasks. The dispatcher wakes on queue
//! changes (enqueue, terminal transition) and on config changes, then
//! admits as many tasks as the current `pool.max_concurrency` allows and
//! spawns one execution per admission. The limit check and the move to
//! `running` happen under the queue lock, so the bound holds even with
//! several callers pumping at once.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::config::SharedConfig;
use crate::domain::{EdgeEvent, NodeId, Task};
use crate::executor::TaskExecutor;
use crate::ports::{Coordinator, EventSink, ResultSubmission};
use crate::queue::TaskQueue;

pub struct WorkerPool {
    queue: Arc<TaskQueue>,
    executor: Arc<TaskExecutor>,
    coordinator: Arc<dyn Coordinator>,
    node_id: NodeId,
    config: SharedConfig,
    sink: Arc<dyn EventSink>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<TaskQueue>,
        executor: Arc<TaskExecutor>,
        coordinator: Arc<dyn Coordinator>,
        node_id: NodeId,
        config: SharedConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            queue,
            executor,
            coordinator,
            node_id,
            config,
            sink,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.config.current().pool.max_concurrency
    }

    /// Executions spawned and not yet finished (including result submission).
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_draining(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Admit until the queue is empty or the pool is full. Returns how many
    /// tasks were started.
    ///
    /// A lowered limit never interrupts running tasks; it only stops new
    /// admissions until `running` drops below it.
    pub async fn pump(&self) -> usize {
        let mut started = 0;
        while !self.cancel.is_cancelled() {
            let limit = self.max_concurrency();
            let Some(task) = self.queue.admit_within(limit).await else {
                break;
            };
            self.spawn_execution(task);
            started += 1;
        }
        if started > 0 {
            debug!(started, "pool admitted tasks");
        }
        started
    }

    /// Ask the dispatcher to look at the queue again.
    pub fn nudge(&self) {
        self.queue.wake();
    }

    /// Long-running admission loop. Ends when `drain` is called.
    pub fn spawn_dispatcher(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        let mut config_rx = self.config.subscribe();
        tokio::spawn(async move {
            loop {
                pool.pump().await;
                tokio::select! {
                    biased;
                    _ = pool.cancel.cancelled() => break,
                    _ = pool.queue.changed() => {}
                    // the pool's own SharedConfig keeps the sender alive
                    _ = config_rx.changed() => {}
                }
            }
            debug!("pool dispatcher stopped");
        })
    }

    /// Stop admitting and wait for every in-flight execution to finish.
    pub async fn drain(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    fn spawn_execution(&self, task: Task) {
        let queue = Arc::clone(&self.queue);
        let executor = Arc::clone(&self.executor);
        let coordinator = Arc::clone(&self.coordinator);
        let sink = Arc::clone(&self.sink);
        let node_id = self.node_id.clone();
        let retain = self.config.current().queue.retain_terminal;

        self.tracker.spawn(async move {
            let result = executor.dispatch(&task).await;

            // The slot is released here, before the network round trip.
            if let Err(err) = queue.settle(&task.id, result.clone()).await {
                warn!(task_id = %task.id, error = %err, "could not settle task");
                return;
            }
            queue.prune_terminal(retain).await;

            let submission = ResultSubmission::new(task.id.clone(), node_id, &result);
            match coordinator.submit_result(&submission).await {
                Ok(()) => sink.emit(EdgeEvent::ResultSubmitted { task_id: task.id }),
                Err(err) => sink.emit(EdgeEvent::ResultSubmitFailed {
                    task_id: task.id,
                    error: err.to_string(),
                }),
            }
        });
    }
}
