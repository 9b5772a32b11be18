//! EdgeBuilder: wires config, ports, handlers and components into an
//! `EdgeRuntime`.
//!
//! Validation happens in `build()` so a misconfigured node fails at start
//! instead of on its first task.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use super::automation::{AutomationDeps, AutomationService};
use super::runtime::EdgeRuntime;
use crate::client::{CoordinatorClient, RetryingClient};
use crate::config::{EdgeConfig, SharedConfig};
use crate::domain::NodeId;
use crate::error::{ClientError, ConfigError, HandlerError};
use crate::executor::{
    DynHandler, EarningsTable, Handler, HandlerContext, HandlerRegistry, RegistryError,
    TaskExecutor, TaskPayload, builtin,
};
use crate::impls::{SystemProbe, TracingEventSink};
use crate::pool::WorkerPool;
use crate::ports::{Capabilities, Clock, Coordinator, EventSink, ResourceProbe, SystemClock};
use crate::queue::TaskQueue;
use crate::sandbox::ExecutionSandbox;

const MB_PER_GB: f64 = 1024.0;

/// Build-time failures.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing task types: {0:?}; they were expected but no handler is registered")]
    MissingTaskTypes(Vec<String>),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot build coordinator client: {0}")]
    Client(#[from] ClientError),
}

/// ```ignore
/// let runtime = EdgeBuilder::new()
///     .config(config)
///     .with_builtin()?
///     .register::<RenderJob, _>(RenderHandler)?
///     .expect_tasks(&["compute", "render"])
///     .build()?;
/// runtime.start();
/// ```
pub struct EdgeBuilder {
    registry: HandlerRegistry,
    expected_tasks: Option<Vec<String>>,
    config: EdgeConfig,
    coordinator: Option<Arc<dyn Coordinator>>,
    sink: Option<Arc<dyn EventSink>>,
    probe: Option<Arc<dyn ResourceProbe>>,
    clock: Option<Arc<dyn Clock>>,
    node_id: Option<NodeId>,
    earnings: EarningsTable,
}

impl EdgeBuilder {
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            expected_tasks: None,
            config: EdgeConfig::default(),
            coordinator: None,
            sink: None,
            probe: None,
            clock: None,
            node_id: None,
            earnings: EarningsTable::default(),
        }
    }

    pub fn register<T: TaskPayload, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<T, H>(handler)?;
        Ok(self)
    }

    pub fn register_fn<F, Fut>(
        mut self,
        task_type: impl Into<String>,
        f: F,
    ) -> Result<Self, RegistryError>
    where
        F: Fn(Value, HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.registry.register_fn(task_type, f)?;
        Ok(self)
    }

    pub fn register_dyn(mut self, handler: Arc<dyn DynHandler>) -> Result<Self, RegistryError> {
        self.registry.register_dyn(handler)?;
        Ok(self)
    }

    /// Add `compute`, `hash_calculation` and `data_analysis`.
    pub fn with_builtin(mut self) -> Result<Self, RegistryError> {
        builtin::register_builtin(&mut self.registry)?;
        Ok(self)
    }

    /// Task types that must have a handler by `build()` time.
    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn config(mut self, config: EdgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this coordinator instead of the HTTP client built from `config.api`.
    pub fn coordinator(mut self, coordinator: Arc<dyn Coordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub fn earnings(mut self, earnings: EarningsTable) -> Self {
        self.earnings = earnings;
        self
    }

    pub fn build(self) -> Result<EdgeRuntime, BuildError> {
        self.config.validate()?;

        if let Some(expected) = &self.expected_tasks {
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !self.registry.contains(t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing));
            }
        }

        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(TracingEventSink) as Arc<dyn EventSink>);
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(SystemProbe::new()) as Arc<dyn ResourceProbe>);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let node_id = self
            .node_id
            .or_else(|| self.config.node.node_id.clone().map(NodeId::new))
            .unwrap_or_else(NodeId::generate);

        let (coordinator, client) = match self.coordinator {
            Some(coordinator) => (coordinator, None),
            None => {
                let client = Arc::new(RetryingClient::new(&self.config.api, Arc::clone(&sink))?);
                let http = CoordinatorClient::new(Arc::clone(&client), self.config.api.endpoints.clone());
                (Arc::new(http) as Arc<dyn Coordinator>, Some(client))
            }
        };

        let host = probe.host_info();
        let handler_types = self.registry.registered_types();
        let capabilities = Capabilities {
            cpu: host.cpu_cores,
            memory: host.memory_total_mb / MB_PER_GB,
            gpu: self.config.node.gpu,
            task_types: if self.config.node.capabilities.is_empty() {
                handler_types.clone()
            } else {
                self.config.node.capabilities.clone()
            },
        };

        let config = SharedConfig::new(self.config);
        let queue = Arc::new(TaskQueue::new(Arc::clone(&clock), Arc::clone(&sink)));
        let sandbox = Arc::new(ExecutionSandbox::new(
            config.clone(),
            Arc::clone(&probe),
            Arc::clone(&sink),
        ));
        let executor = Arc::new(
            TaskExecutor::new(Arc::new(self.registry), Arc::clone(&sandbox), clock)
                .with_earnings(self.earnings),
        );
        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&queue),
            Arc::clone(&executor),
            Arc::clone(&coordinator),
            node_id.clone(),
            config.clone(),
            Arc::clone(&sink),
        ));
        let automation = AutomationService::new(AutomationDeps {
            coordinator: Arc::clone(&coordinator),
            queue: Arc::clone(&queue),
            pool: Arc::clone(&pool),
            probe: Arc::clone(&probe),
            config: config.clone(),
            sink: Arc::clone(&sink),
            node_id: node_id.clone(),
            capabilities: capabilities.clone(),
        });

        Ok(EdgeRuntime {
            node_id,
            config,
            queue,
            pool,
            executor,
            automation,
            coordinator,
            client,
            probe,
            sink,
            capabilities,
            handler_types,
            dispatcher: parking_lot::Mutex::new(None),
        })
    }
}

impl Default for EdgeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
