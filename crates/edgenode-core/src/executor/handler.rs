//! Handler traits.
//!
//! Two layers:
//! - **typed**: `TaskPayload` ties a task-type string to a payload type,
//!   `Handler<T>` handles exactly that payload. A typo in the task type is a
//!   compile error, not a runtime miss.
//! - **dyn**: `DynHandler` is object-safe and works on raw JSON, so handlers
//!   can live in one map. `TypedHandler<T, H>` erases a typed handler into
//!   this form; `FnHandler` wraps a closure for task types only known at
//!   runtime.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::domain::TaskId;
use crate::error::HandlerError;

/// Binds a payload type to its task-type tag.
///
/// ```ignore
/// #[derive(Deserialize)]
/// struct Resize { width: u32 }
///
/// impl TaskPayload for Resize {
///     const TYPE: &'static str = "image_processing";
///     type Output = serde_json::Value;
/// }
/// ```
pub trait TaskPayload: DeserializeOwned + Send + 'static {
    const TYPE: &'static str;

    type Output: Serialize + Send + 'static;
}

/// Everything a handler may see besides its payload.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub task_id: TaskId,
    cancel: CancellationToken,
}

impl HandlerContext {
    pub fn new(task_id: TaskId, cancel: CancellationToken) -> Self {
        Self { task_id, cancel }
    }

    /// Set once the sandbox gave up on this run (timeout or hard limit).
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// `Err(Cancelled)` if the run was abandoned; for use inside long loops.
    pub fn checkpoint(&self) -> Result<(), HandlerError> {
        if self.is_cancelled() {
            Err(HandlerError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
pub trait Handler<T: TaskPayload>: Send + Sync {
    async fn handle(&self, payload: T, ctx: HandlerContext) -> Result<T::Output, HandlerError>;
}

/// Object-safe handler over JSON payloads.
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, payload: Value, ctx: HandlerContext) -> Result<Value, HandlerError>;

    fn task_type(&self) -> &str;
}

pub struct TypedHandler<T: TaskPayload, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: TaskPayload, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: TaskPayload, H: Handler<T> + 'static> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(&self, payload: Value, ctx: HandlerContext) -> Result<Value, HandlerError> {
        let payload: T = serde_json::from_value(payload)
            .map_err(|e| HandlerError::InvalidPayload(e.to_string()))?;
        let output = self.handler.handle(payload, ctx).await?;
        serde_json::to_value(output)
            .map_err(|e| HandlerError::failed(format!("output encode: {e}")))
    }

    fn task_type(&self) -> &str {
        T::TYPE
    }
}

/// Closure-backed handler.
pub struct FnHandler<F> {
    task_type: String,
    f: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Value, HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    pub fn new(task_type: impl Into<String>, f: F) -> Self {
        Self {
            task_type: task_type.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> DynHandler for FnHandler<F>
where
    F: Fn(Value, HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn handle_dyn(&self, payload: Value, ctx: HandlerContext) -> Result<Value, HandlerError> {
        (self.f)(payload, ctx).await
    }

    fn task_type(&self) -> &str {
        &self.task_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Echo {
        value: i32,
    }

    impl TaskPayload for Echo {
        const TYPE: &'static str = "test.echo";
        type Output = i32;
    }

    struct EchoHandler;

    #[async_trait]
    impl Handler<Echo> for EchoHandler {
        async fn handle(&self, payload: Echo, _ctx: HandlerContext) -> Result<i32, HandlerError> {
            Ok(payload.value * 2)
        }
    }

    fn ctx() -> HandlerContext {
        HandlerContext::new(TaskId::new("t"), CancellationToken::new())
    }

    #[tokio::test]
    async fn typed_handler_decodes_and_encodes() {
        let h = TypedHandler::<Echo, _>::new(EchoHandler);
        assert_eq!(h.task_type(), "test.echo");
        let out = h.handle_dyn(json!({ "value": 21 }), ctx()).await.unwrap();
        assert_eq!(out, json!(42));
    }

    #[tokio::test]
    async fn typed_handler_rejects_bad_payload() {
        let h = TypedHandler::<Echo, _>::new(EchoHandler);
        let err = h.handle_dyn(json!({ "nope": 1 }), ctx()).await.unwrap_err();
        assert!(matches!(err, HandlerError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn fn_handler_runs_closure() {
        let h = FnHandler::new("upper", |payload: Value, _ctx| async move {
            let s = payload.as_str().unwrap_or_default().to_uppercase();
            Ok(Value::String(s))
        });
        assert_eq!(h.task_type(), "upper");
        assert_eq!(h.handle_dyn(json!("abc"), ctx()).await.unwrap(), json!("ABC"));
    }

    #[test]
    fn checkpoint_reports_cancellation() {
        let token = CancellationToken::new();
        let ctx = HandlerContext::new(TaskId::new("t"), token.clone());
        assert!(ctx.checkpoint().is_ok());
        token.cancel();
        assert_eq!(ctx.checkpoint(), Err(HandlerError::Cancelled));
    }
}
