use std::time::Duration;

use thiserror::Error;

use crate::domain::{TaskId, TaskState, TaskType};

/// Failures talking to the coordinator.
///
/// Only the final outcome of a logical request is surfaced; individual
/// transport attempts are retried inside [`crate::client::RetryingClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error after {attempts} attempt(s): {message}")]
    Transport { attempts: u32, message: String },

    #[error("unauthorized: credentials cleared, re-authentication required")]
    Auth,

    #[error("rate limited {waits} time(s) in a row, giving up")]
    RateLimited { waits: u32 },

    #[error("coordinator rejected request (status={status}): {message}")]
    Business { status: u16, message: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("failed to build http client: {0}")]
    Build(String),
}

impl ClientError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::Auth)
    }
}

/// Queue contract violations.
///
/// `InvalidTransition` means a caller tried to move a task along an edge the
/// state machine does not have; treat it as a defect.
#[derive(Debug, Error, PartialEq)]
pub enum QueueError {
    #[error("task {0} is already known to the queue")]
    DuplicateTask(TaskId),

    #[error("invalid transition for task {task_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        task_id: TaskId,
        from: Option<TaskState>,
        to: TaskState,
    },

    #[error("task {task_id} is not terminal (state={state:?})")]
    NotTerminal { task_id: TaskId, state: TaskState },

    #[error("task {0} not found")]
    UnknownTask(TaskId),
}

/// Why a single task ended up in the failed bucket.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TaskError {
    #[error("no handler registered for task_type={0}")]
    UnsupportedTaskType(TaskType),

    #[error("task timed out after {0:?}")]
    Timeout(Duration),

    #[error("handler error: {0}")]
    Handler(String),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("{resource} usage {observed:.1} exceeded hard limit {limit:.1}")]
    ResourceLimitExceeded {
        resource: &'static str,
        observed: f64,
        limit: f64,
    },

    #[error("a sandbox session is already active for task {0}")]
    SessionConflict(TaskId),
}

/// Errors a handler may return. Anything else is a panic and is contained by
/// the sandbox.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HandlerError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("{0}")]
    Failed(String),

    #[error("cancelled")]
    Cancelled,
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

impl From<HandlerError> for TaskError {
    fn from(err: HandlerError) -> Self {
        TaskError::Handler(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
