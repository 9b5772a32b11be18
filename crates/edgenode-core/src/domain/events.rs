//! Events emitted to the observability sink.
//!
//! Every queue transition, sandbox warning and coordinator round trip is
//! reported as an `EdgeEvent`. Sinks decide what to do with them; the
//! default forwards to `tracing`.

use std::fmt;
use std::time::Duration;

use super::{ErrorInfo, NodeId, TaskId, TaskState, TaskType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EdgeEvent {
    TaskEnqueued {
        task_id: TaskId,
        task_type: TaskType,
        score: f64,
    },
    TaskAdmitted {
        task_id: TaskId,
        running: usize,
    },
    TaskCompleted {
        task_id: TaskId,
        duration_ms: u64,
    },
    TaskFailed {
        task_id: TaskId,
        error: ErrorInfo,
    },
    TaskTimedOut {
        task_id: TaskId,
        timeout: Duration,
    },
    TaskRescored {
        task_id: TaskId,
        score: f64,
    },
    TaskEvicted {
        task_id: TaskId,
    },
    InvalidTransition {
        task_id: TaskId,
        from: Option<TaskState>,
        to: TaskState,
    },
    ResourceWarning {
        task_id: TaskId,
        resource: &'static str,
        observed: f64,
        limit: f64,
    },
    RequestRetry {
        path: String,
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    RateLimited {
        path: String,
        wait: Duration,
    },
    AuthRequired {
        path: String,
    },
    NodeRegistered {
        node_id: NodeId,
    },
    HeartbeatSent {
        running: usize,
        waiting: usize,
    },
    HeartbeatFailed {
        error: String,
    },
    TasksPulled {
        received: usize,
        enqueued: usize,
    },
    PullSkipped {
        waiting: usize,
    },
    PullFailed {
        error: String,
    },
    ResultSubmitted {
        task_id: TaskId,
    },
    ResultSubmitFailed {
        task_id: TaskId,
        error: String,
    },
    ConfigReloaded,
    ServiceStarted,
    ServiceStopped,
}

impl EdgeEvent {
    pub fn level(&self) -> EventLevel {
        match self {
            EdgeEvent::InvalidTransition { .. } => EventLevel::Error,
            EdgeEvent::TaskFailed { .. }
            | EdgeEvent::TaskTimedOut { .. }
            | EdgeEvent::ResourceWarning { .. }
            | EdgeEvent::RequestRetry { .. }
            | EdgeEvent::RateLimited { .. }
            | EdgeEvent::AuthRequired { .. }
            | EdgeEvent::HeartbeatFailed { .. }
            | EdgeEvent::PullFailed { .. }
            | EdgeEvent::ResultSubmitFailed { .. } => EventLevel::Warn,
            _ => EventLevel::Info,
        }
    }

    /// The task this event is about, if any.
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            EdgeEvent::TaskEnqueued { task_id, .. }
            | EdgeEvent::TaskAdmitted { task_id, .. }
            | EdgeEvent::TaskCompleted { task_id, .. }
            | EdgeEvent::TaskFailed { task_id, .. }
            | EdgeEvent::TaskTimedOut { task_id, .. }
            | EdgeEvent::TaskRescored { task_id, .. }
            | EdgeEvent::TaskEvicted { task_id }
            | EdgeEvent::InvalidTransition { task_id, .. }
            | EdgeEvent::ResourceWarning { task_id, .. }
            | EdgeEvent::ResultSubmitted { task_id }
            | EdgeEvent::ResultSubmitFailed { task_id, .. } => Some(task_id),
            _ => None,
        }
    }

    /// Short stable name, used as a structured field.
    pub fn name(&self) -> &'static str {
        match self {
            EdgeEvent::TaskEnqueued { .. } => "task_enqueued",
            EdgeEvent::TaskAdmitted { .. } => "task_admitted",
            EdgeEvent::TaskCompleted { .. } => "task_completed",
            EdgeEvent::TaskFailed { .. } => "task_failed",
            EdgeEvent::TaskTimedOut { .. } => "task_timed_out",
            EdgeEvent::TaskRescored { .. } => "task_rescored",
            EdgeEvent::TaskEvicted { .. } => "task_evicted",
            EdgeEvent::InvalidTransition { .. } => "invalid_transition",
            EdgeEvent::ResourceWarning { .. } => "resource_warning",
            EdgeEvent::RequestRetry { .. } => "request_retry",
            EdgeEvent::RateLimited { .. } => "rate_limited",
            EdgeEvent::AuthRequired { .. } => "auth_required",
            EdgeEvent::NodeRegistered { .. } => "node_registered",
            EdgeEvent::HeartbeatSent { .. } => "heartbeat_sent",
            EdgeEvent::HeartbeatFailed { .. } => "heartbeat_failed",
            EdgeEvent::TasksPulled { .. } => "tasks_pulled",
            EdgeEvent::PullSkipped { .. } => "pull_skipped",
            EdgeEvent::PullFailed { .. } => "pull_failed",
            EdgeEvent::ResultSubmitted { .. } => "result_submitted",
            EdgeEvent::ResultSubmitFailed { .. } => "result_submit_failed",
            EdgeEvent::ConfigReloaded => "config_reloaded",
            EdgeEvent::ServiceStarted => "service_started",
            EdgeEvent::ServiceStopped => "service_stopped",
        }
    }
}

impl fmt::Display for EdgeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeEvent::TaskEnqueued {
                task_id,
                task_type,
                score,
            } => write!(f, "task {task_id} ({task_type}) enqueued, score={score:.2}"),
            EdgeEvent::TaskAdmitted { task_id, running } => {
                write!(f, "task {task_id} admitted, running={running}")
            }
            EdgeEvent::TaskCompleted {
                task_id,
                duration_ms,
            } => write!(f, "task {task_id} completed in {duration_ms}ms"),
            EdgeEvent::TaskFailed { task_id, error } => {
                write!(f, "task {task_id} failed [{}]: {}", error.kind, error.message)
            }
            EdgeEvent::TaskTimedOut { task_id, timeout } => {
                write!(f, "task {task_id} timed out after {timeout:?}")
            }
            EdgeEvent::TaskRescored { task_id, score } => {
                write!(f, "task {task_id} rescored to {score:.2}")
            }
            EdgeEvent::TaskEvicted { task_id } => write!(f, "task {task_id} evicted"),
            EdgeEvent::InvalidTransition { task_id, from, to } => match from {
                Some(from) => write!(f, "invalid transition for task {task_id}: {from} -> {to}"),
                None => write!(f, "invalid transition for unknown task {task_id} -> {to}"),
            },
            EdgeEvent::ResourceWarning {
                task_id,
                resource,
                observed,
                limit,
            } => write!(
                f,
                "task {task_id}: {resource} usage {observed:.1} above threshold {limit:.1}"
            ),
            EdgeEvent::RequestRetry {
                path,
                attempt,
                delay,
                reason,
            } => write!(f, "{path}: retry #{attempt} in {delay:?} ({reason})"),
            EdgeEvent::RateLimited { path, wait } => {
                write!(f, "{path}: rate limited, waiting {wait:?}")
            }
            EdgeEvent::AuthRequired { path } => {
                write!(f, "{path}: unauthorized, login required")
            }
            EdgeEvent::NodeRegistered { node_id } => write!(f, "node {node_id} registered"),
            EdgeEvent::HeartbeatSent { running, waiting } => {
                write!(f, "heartbeat sent (running={running}, waiting={waiting})")
            }
            EdgeEvent::HeartbeatFailed { error } => write!(f, "heartbeat failed: {error}"),
            EdgeEvent::TasksPulled { received, enqueued } => {
                write!(f, "pulled {received} task(s), enqueued {enqueued}")
            }
            EdgeEvent::PullSkipped { waiting } => {
                write!(f, "pull skipped, {waiting} task(s) already waiting")
            }
            EdgeEvent::PullFailed { error } => write!(f, "task pull failed: {error}"),
            EdgeEvent::ResultSubmitted { task_id } => {
                write!(f, "result for task {task_id} submitted")
            }
            EdgeEvent::ResultSubmitFailed { task_id, error } => {
                write!(f, "result for task {task_id} not submitted: {error}")
            }
            EdgeEvent::ConfigReloaded => f.write_str("configuration reloaded"),
            EdgeEvent::ServiceStarted => f.write_str("automation service started"),
            EdgeEvent::ServiceStopped => f.write_str("automation service stopped"),
        }
    }
}
