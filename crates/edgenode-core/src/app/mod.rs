//! Application layer: wiring and the long-running service.
//!
//! - **EdgeBuilder**: registers handlers, picks ports, validates, builds
//! - **EdgeRuntime**: the assembled node (start, submit, status, shutdown)
//! - **AutomationService**: heartbeat and task-pull loops
//! - **status**: node status and task statistics

pub mod automation;
pub mod builder;
pub mod runtime;
pub mod status;

pub use self::automation::{AutomationService, PullOutcome};
pub use self::builder::{BuildError, EdgeBuilder};
pub use self::runtime::EdgeRuntime;
pub use self::status::{NodeStatus, TaskStatistics, TypeStatistics};
