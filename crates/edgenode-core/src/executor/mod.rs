//! Task executor: routes a task to its handler and normalizes the outcome.

pub mod builtin;
mod earnings;
mod handler;
mod registry;

pub use earnings::EarningsTable;
pub use handler::{DynHandler, FnHandler, Handler, HandlerContext, TaskPayload, TypedHandler};
pub use registry::{HandlerRegistry, RegistryError};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::domain::{ErrorInfo, ResourceMetrics, Task, TaskResult};
use crate::error::TaskError;
use crate::ports::Clock;
use crate::sandbox::ExecutionSandbox;

pub struct TaskExecutor {
    registry: Arc<HandlerRegistry>,
    sandbox: Arc<ExecutionSandbox>,
    clock: Arc<dyn Clock>,
    earnings: EarningsTable,
}

impl TaskExecutor {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        sandbox: Arc<ExecutionSandbox>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            sandbox,
            clock,
            earnings: EarningsTable::default(),
        }
    }

    pub fn with_earnings(mut self, earnings: EarningsTable) -> Self {
        self.earnings = earnings;
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn sandbox(&self) -> &ExecutionSandbox {
        &self.sandbox
    }

    /// Run one task to a normalized result. Never fails: every problem ends
    /// up as a `failed` result.
    ///
    /// An unregistered task type fails immediately without opening a
    /// sandbox session.
    pub async fn dispatch(&self, task: &Task) -> TaskResult {
        let Some(handler) = self.registry.get(task.task_type.as_str()) else {
            let err = TaskError::UnsupportedTaskType(task.task_type.clone());
            return TaskResult::failed(
                ErrorInfo::from(&err),
                0,
                ResourceMetrics::default(),
                self.clock.now(),
            );
        };

        let cancel = CancellationToken::new();
        let ctx = HandlerContext::new(task.id.clone(), cancel.clone());
        let payload = task.payload.clone();
        let report = self
            .sandbox
            .run(&task.id, cancel, async move {
                handler.handle_dyn(payload, ctx).await
            })
            .await;

        let duration_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX);
        let mut metrics = report.metrics;
        match report.outcome {
            Ok(output) => {
                metrics.estimated_earnings =
                    self.earnings.estimate(task.task_type.as_str(), report.elapsed);
                TaskResult::completed(output, duration_ms, metrics, self.clock.now())
            }
            Err(err) => {
                TaskResult::failed(ErrorInfo::from(&err), duration_ms, metrics, self.clock.now())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{Value, json};

    use super::*;
    use crate::config::{EdgeConfig, SharedConfig};
    use crate::domain::{TaskId, TaskStatus};
    use crate::error::HandlerError;
    use crate::impls::{FixedProbe, MemoryEventSink};
    use crate::ports::SystemClock;

    fn executor(registry: HandlerRegistry, timeout_ms: u64) -> TaskExecutor {
        let mut config = EdgeConfig::default();
        config.sandbox.timeout_ms = timeout_ms;
        let sandbox = ExecutionSandbox::new(
            SharedConfig::new(config),
            Arc::new(FixedProbe::new(5.0, 32.0)),
            Arc::new(MemoryEventSink::new()),
        );
        TaskExecutor::new(Arc::new(registry), Arc::new(sandbox), Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn unknown_type_fails_without_session() {
        let exec = executor(HandlerRegistry::new(), 1_000);
        let task = Task::new(TaskId::new("u"), "teleport", json!({}));
        let result = exec.dispatch(&task).await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.error.unwrap().kind, "unsupported_task_type");
        assert!(exec.sandbox().session(&task.id).is_none());
    }

    #[tokio::test]
    async fn completed_result_carries_output_and_earnings() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_fn("model_training", |payload: Value, _| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(json!({ "echo": payload }))
            })
            .unwrap();
        let exec = executor(registry, 1_000);
        let task = Task::new(TaskId::new("m"), "model_training", json!(7));

        let result = exec.dispatch(&task).await;
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.output, Some(json!({ "echo": 7 })));
        assert!(result.duration_ms >= 20);
        assert!(result.metrics.estimated_earnings >= 0.0);
        assert!(exec.sandbox().session(&task.id).is_some());
    }

    #[tokio::test]
    async fn handler_failure_is_normalized() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_fn("flaky", |_, _| async { Err(HandlerError::failed("nope")) })
            .unwrap();
        let exec = executor(registry, 1_000);
        let result = exec
            .dispatch(&Task::new(TaskId::new("f"), "flaky", Value::Null))
            .await;
        let error = result.error.unwrap();
        assert_eq!(error.kind, "handler_error");
        assert!(error.message.contains("nope"));
        assert_eq!(result.metrics.estimated_earnings, 0.0);
    }

    #[tokio::test]
    async fn timeout_is_normalized() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_fn("stuck", |_, ctx: HandlerContext| async move {
                ctx.cancelled().await;
                Err(HandlerError::Cancelled)
            })
            .unwrap();
        let exec = executor(registry, 100);
        let result = exec
            .dispatch(&Task::new(TaskId::new("s"), "stuck", Value::Null))
            .await;
        assert_eq!(result.error.unwrap().kind, "timeout");
        assert!(result.duration_ms >= 100);
    }

    #[tokio::test]
    async fn builtin_hash_runs_through_dispatch() {
        let mut registry = HandlerRegistry::new();
        builtin::register_builtin(&mut registry).unwrap();
        let exec = executor(registry, 5_000);
        let task = Task::new(
            TaskId::new("h"),
            "hash_calculation",
            json!({ "input": "abc", "iterations": 0 }),
        );
        let result = exec.dispatch(&task).await;
        let output = result.output.unwrap();
        assert_eq!(
            output["hash"],
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
