//! Execution sandbox: a logical boundary around one handler run.
//!
//! The handler runs in its own tokio task and is raced against a hard
//! deadline and a resource sampling tick. Handler errors and panics become a
//! failed outcome; nothing escapes to the caller. This is not OS-level
//! isolation: an aborted handler that never yields keeps its worker thread
//! until it reaches an `.await`.

mod session;

pub use session::{SandboxSession, SessionStatus};

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinError;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{SandboxConfig, SharedConfig};
use crate::domain::{EdgeEvent, ResourceMetrics, TaskId};
use crate::error::{HandlerError, TaskError};
use crate::ports::{EventSink, ResourceProbe};

/// What one sandboxed run produced.
#[derive(Debug, Clone)]
pub struct SandboxReport {
    pub outcome: Result<Value, TaskError>,
    pub elapsed: Duration,
    pub metrics: ResourceMetrics,
}

type Sessions = Arc<Mutex<HashMap<TaskId, SandboxSession>>>;

pub struct ExecutionSandbox {
    config: SharedConfig,
    probe: Arc<dyn ResourceProbe>,
    sink: Arc<dyn EventSink>,
    sessions: Sessions,
    generation: AtomicU64,
}

impl ExecutionSandbox {
    pub fn new(
        config: SharedConfig,
        probe: Arc<dyn ResourceProbe>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            probe,
            sink,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Run `work` for `task_id` under the current sandbox limits.
    ///
    /// `cancel` is the token the handler was given; it is cancelled when
    /// the deadline or a hard limit ends the run.
    pub async fn run<F>(&self, task_id: &TaskId, cancel: CancellationToken, work: F) -> SandboxReport
    where
        F: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        let limits = self.config.current().sandbox;
        let started = Instant::now();

        let generation = match self.open_session(task_id) {
            Ok(generation) => generation,
            Err(err) => {
                return SandboxReport {
                    outcome: Err(err),
                    elapsed: started.elapsed(),
                    metrics: ResourceMetrics::default(),
                };
            }
        };

        self.set_status(task_id, generation, SessionStatus::Running);
        let mut handle = tokio::spawn(work);

        let deadline = tokio::time::sleep(limits.timeout());
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval_at(
            Instant::now() + limits.sample_interval(),
            limits.sample_interval(),
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut metrics = ResourceMetrics::default();
        let mut warned = Warned::default();

        let (outcome, status) = loop {
            tokio::select! {
                biased;

                joined = &mut handle => {
                    let outcome = join_outcome(joined);
                    let status = if outcome.is_ok() {
                        SessionStatus::Completed
                    } else {
                        SessionStatus::Failed
                    };
                    break (outcome, status);
                }

                _ = &mut deadline => {
                    cancel.cancel();
                    handle.abort();
                    self.sink.emit(EdgeEvent::TaskTimedOut {
                        task_id: task_id.clone(),
                        timeout: limits.timeout(),
                    });
                    break (Err(TaskError::Timeout(limits.timeout())), SessionStatus::TimedOut);
                }

                _ = ticker.tick() => {
                    let sample = self.probe.sample();
                    metrics.record(sample.cpu_percent, sample.memory_mb);
                    self.record_metrics(task_id, generation, metrics);

                    if let Some(err) = self.check_limits(task_id, &limits, &metrics, &mut warned) {
                        cancel.cancel();
                        handle.abort();
                        break (Err(err), SessionStatus::Failed);
                    }
                }
            }
        };

        self.close_session(task_id, generation, status, metrics, limits.teardown_delay());

        SandboxReport {
            outcome,
            elapsed: started.elapsed(),
            metrics,
        }
    }

    /// Warn once per resource per run; with `enforce_limits` the first
    /// crossing ends the run instead.
    fn check_limits(
        &self,
        task_id: &TaskId,
        limits: &SandboxConfig,
        metrics: &ResourceMetrics,
        warned: &mut Warned,
    ) -> Option<TaskError> {
        let checks = [
            ("cpu", metrics.cpu_percent, limits.cpu_threshold_percent, &mut warned.cpu),
            ("memory", metrics.memory_mb, limits.memory_threshold_mb, &mut warned.memory),
        ];
        for (resource, observed, limit, flag) in checks {
            if observed <= limit {
                continue;
            }
            if limits.enforce_limits {
                return Some(TaskError::ResourceLimitExceeded {
                    resource,
                    observed,
                    limit,
                });
            }
            if !*flag {
                *flag = true;
                self.sink.emit(EdgeEvent::ResourceWarning {
                    task_id: task_id.clone(),
                    resource,
                    observed,
                    limit,
                });
            }
        }
        None
    }

    fn open_session(&self, task_id: &TaskId) -> Result<u64, TaskError> {
        let mut sessions = self.sessions.lock();
        if let Some(existing) = sessions.get(task_id) {
            if existing.status.is_active() {
                return Err(TaskError::SessionConflict(task_id.clone()));
            }
        }
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        sessions.insert(task_id.clone(), SandboxSession::new(task_id.clone(), generation));
        Ok(generation)
    }

    fn set_status(&self, task_id: &TaskId, generation: u64, status: SessionStatus) {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get_mut(task_id) {
            if session.generation == generation {
                session.status = status;
            }
        }
    }

    fn record_metrics(&self, task_id: &TaskId, generation: u64, metrics: ResourceMetrics) {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get_mut(task_id) {
            if session.generation == generation {
                session.metrics = metrics;
            }
        }
    }

    fn close_session(
        &self,
        task_id: &TaskId,
        generation: u64,
        status: SessionStatus,
        metrics: ResourceMetrics,
        teardown_delay: Duration,
    ) {
        {
            let mut sessions = self.sessions.lock();
            if let Some(session) = sessions.get_mut(task_id) {
                if session.generation == generation {
                    session.status = status;
                    session.metrics = metrics;
                    session.finished_at = Some(Utc::now());
                }
            }
        }

        let sessions = Arc::clone(&self.sessions);
        let task_id = task_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(teardown_delay).await;
            let mut sessions = sessions.lock();
            let same = sessions
                .get(&task_id)
                .is_some_and(|s| s.generation == generation);
            if same {
                sessions.remove(&task_id);
                debug!(task_id = %task_id, "sandbox session torn down");
            }
        });
    }

    pub fn session(&self, task_id: &TaskId) -> Option<SandboxSession> {
        self.sessions.lock().get(task_id).cloned()
    }

    pub fn sessions(&self) -> Vec<SandboxSession> {
        let mut all: Vec<SandboxSession> = self.sessions.lock().values().cloned().collect();
        all.sort_by_key(|s| s.generation);
        all
    }

    pub fn active_count(&self) -> usize {
        self.sessions
            .lock()
            .values()
            .filter(|s| s.status.is_active())
            .count()
    }
}

#[derive(Default)]
struct Warned {
    cpu: bool,
    memory: bool,
}

fn join_outcome(joined: Result<Result<Value, HandlerError>, JoinError>) -> Result<Value, TaskError> {
    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.into()),
        Err(err) if err.is_panic() => Err(TaskError::Panicked(panic_message(err.into_panic()))),
        Err(_) => Err(TaskError::Handler("handler task was cancelled".into())),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EdgeConfig;
    use crate::impls::{FixedProbe, MemoryEventSink, SystemProbe};

    fn sandbox_with(
        edit: impl FnOnce(&mut SandboxConfig),
        probe: impl ResourceProbe + 'static,
    ) -> (ExecutionSandbox, Arc<MemoryEventSink>) {
        let mut config = EdgeConfig::default();
        edit(&mut config.sandbox);
        let sink = Arc::new(MemoryEventSink::new());
        let sandbox = ExecutionSandbox::new(SharedConfig::new(config), Arc::new(probe), sink.clone());
        (sandbox, sink)
    }

    fn explode() -> Result<Value, HandlerError> {
        panic!("kaboom")
    }

    fn idle_probe() -> FixedProbe {
        FixedProbe::new(10.0, 64.0)
    }

    #[tokio::test]
    async fn completed_handler_value_is_returned() {
        let (sandbox, _) = sandbox_with(|_| {}, idle_probe());
        let id = TaskId::new("ok");
        let report = sandbox
            .run(&id, CancellationToken::new(), async { Ok(serde_json::json!(42)) })
            .await;
        assert_eq!(report.outcome, Ok(serde_json::json!(42)));
        assert_eq!(sandbox.session(&id).unwrap().status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn timeout_fires_and_cancels_handler() {
        let (sandbox, sink) = sandbox_with(|c| c.timeout_ms = 100, idle_probe());
        let id = TaskId::new("slow");
        let cancel = CancellationToken::new();
        let started = std::time::Instant::now();

        let report = sandbox
            .run(&id, cancel.clone(), async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(Value::Null)
            })
            .await;

        assert_eq!(report.outcome, Err(TaskError::Timeout(Duration::from_millis(100))));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(cancel.is_cancelled());
        assert_eq!(sandbox.session(&id).unwrap().status, SessionStatus::TimedOut);
        assert!(sink.names().contains(&"task_timed_out"));
    }

    #[tokio::test]
    async fn handler_error_is_contained() {
        let (sandbox, _) = sandbox_with(|_| {}, idle_probe());
        let report = sandbox
            .run(&TaskId::new("e"), CancellationToken::new(), async {
                Err(HandlerError::failed("bad input"))
            })
            .await;
        assert_eq!(report.outcome, Err(TaskError::Handler("bad input".into())));
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let (sandbox, _) = sandbox_with(|_| {}, idle_probe());
        let id = TaskId::new("p");
        let report = sandbox
            .run(&id, CancellationToken::new(), async { explode() })
            .await;
        assert_eq!(report.outcome, Err(TaskError::Panicked("kaboom".into())));
        assert_eq!(sandbox.session(&id).unwrap().status, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn threshold_crossing_only_warns_by_default() {
        let (sandbox, sink) = sandbox_with(|c| c.sample_interval_ms = 10, FixedProbe::new(95.0, 64.0));
        let report = sandbox
            .run(&TaskId::new("hot"), CancellationToken::new(), async {
                tokio::time::sleep(Duration::from_millis(120)).await;
                Ok(Value::Null)
            })
            .await;
        assert!(report.outcome.is_ok());
        assert!(report.metrics.samples >= 2);
        assert_eq!(report.metrics.peak_cpu_percent, 95.0);
        let warnings = sink
            .names()
            .into_iter()
            .filter(|n| *n == "resource_warning")
            .count();
        assert_eq!(warnings, 1);
    }

    #[tokio::test]
    async fn light_task_under_default_memory_limit_is_not_flagged() {
        // other tests share this process, so only the memory default is kept
        let (sandbox, sink) = sandbox_with(
            |c| {
                c.sample_interval_ms = 10;
                c.cpu_threshold_percent = 100.0;
                c.enforce_limits = true;
            },
            SystemProbe::new(),
        );
        let report = sandbox
            .run(&TaskId::new("light"), CancellationToken::new(), async {
                tokio::time::sleep(Duration::from_millis(80)).await;
                Ok(Value::Null)
            })
            .await;
        assert_eq!(report.outcome, Ok(Value::Null));
        assert!(report.metrics.samples >= 2);
        assert!(report.metrics.peak_memory_mb < 512.0);
        assert_eq!(sink.count("resource_warning"), 0);
    }

    #[tokio::test]
    async fn enforced_limit_fails_the_task() {
        let (sandbox, _) = sandbox_with(
            |c| {
                c.sample_interval_ms = 10;
                c.enforce_limits = true;
            },
            FixedProbe::new(10.0, 2048.0),
        );
        let cancel = CancellationToken::new();
        let report = sandbox
            .run(&TaskId::new("fat"), cancel.clone(), async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(Value::Null)
            })
            .await;
        assert!(matches!(
            report.outcome,
            Err(TaskError::ResourceLimitExceeded { resource: "memory", .. })
        ));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn second_session_for_same_task_conflicts() {
        let (sandbox, _) = sandbox_with(|_| {}, idle_probe());
        let sandbox = Arc::new(sandbox);
        let id = TaskId::new("dup");

        let first = {
            let sandbox = Arc::clone(&sandbox);
            let id = id.clone();
            tokio::spawn(async move {
                sandbox
                    .run(&id, CancellationToken::new(), async {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok(Value::Null)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sandbox.active_count(), 1);

        let second = sandbox
            .run(&id, CancellationToken::new(), async { Ok(Value::Null) })
            .await;
        assert_eq!(second.outcome, Err(TaskError::SessionConflict(id.clone())));

        assert!(first.await.unwrap().outcome.is_ok());
        assert_eq!(sandbox.active_count(), 0);
    }

    #[tokio::test]
    async fn session_is_torn_down_after_delay() {
        let (sandbox, _) = sandbox_with(|c| c.teardown_delay_ms = 30, idle_probe());
        let id = TaskId::new("gone");
        sandbox
            .run(&id, CancellationToken::new(), async { Ok(Value::Null) })
            .await;
        assert!(sandbox.session(&id).is_some());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(sandbox.session(&id).is_none());
        assert!(sandbox.sessions().is_empty());
    }
}
