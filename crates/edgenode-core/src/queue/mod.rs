//! Queue module: task records, bucket bookkeeping and the in-memory queue.

mod memory;
mod record;

pub use memory::TaskQueue;
pub use record::TaskRecord;

use serde::Serialize;

/// Per-bucket sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BucketCounts {
    pub waiting: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl BucketCounts {
    pub fn total(&self) -> usize {
        self.waiting + self.running + self.completed + self.failed
    }
}

/// Point-in-time copy of every bucket. `waiting` is in admission order,
/// `running` in admission time, terminal buckets oldest first.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueSnapshot {
    pub counts: BucketCounts,
    pub waiting: Vec<TaskRecord>,
    pub running: Vec<TaskRecord>,
    pub completed: Vec<TaskRecord>,
    pub failed: Vec<TaskRecord>,
}
