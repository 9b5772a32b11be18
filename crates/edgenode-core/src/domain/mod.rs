//! Domain model (ids, tasks, states, results, events).

pub mod events;
pub mod ids;
pub mod outcome;
pub mod state;
pub mod task;

pub use events::{EdgeEvent, EventLevel};
pub use ids::{NodeId, TaskId};
pub use outcome::{ErrorInfo, ResourceMetrics, TaskResult, TaskStatus};
pub use state::TaskState;
pub use task::{Priority, Task, TaskHints, TaskType};
