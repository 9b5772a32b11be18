//! edgenode-core
//!
//! Core of an edge-compute node: pulls tasks from a coordinator, orders
//! them by priority and value, runs each one under a time and resource
//! limit with bounded concurrency, and reports results back over an
//! unreliable network.
//!
//! # Modules
//! - **domain**: tasks, ids, states, results, events
//! - **ports**: seams to the outside (clock, event sink, coordinator, resource probe)
//! - **config**: `EdgeConfig` and the runtime-updatable `SharedConfig`
//! - **scheduler**: priority score and admission order
//! - **queue**: the four-bucket task state machine
//! - **sandbox**: timeout, resource sampling, failure containment
//! - **executor**: handler registry, built-in handlers, result normalization
//! - **client**: retrying HTTP client and the HTTP coordinator
//! - **pool**: bounded-concurrency admission
//! - **app**: builder, runtime, automation loops, status
//! - **impls**: in-memory and system implementations of the ports

pub mod app;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
pub mod impls;
pub mod pool;
pub mod ports;
pub mod queue;
pub mod sandbox;
pub mod scheduler;

pub use app::{BuildError, EdgeBuilder, EdgeRuntime};
pub use config::{EdgeConfig, SharedConfig};
pub use domain::{Priority, Task, TaskId, TaskResult, TaskState, TaskType};
pub use executor::{Handler, HandlerContext, TaskPayload};
