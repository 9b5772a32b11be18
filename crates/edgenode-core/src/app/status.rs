//! Status queries: node status and task statistics derived from a queue
//! snapshot.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::{NodeId, TaskResult};
use crate::queue::{BucketCounts, QueueSnapshot, TaskRecord};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub node_id: NodeId,
    /// Automation loops running.
    pub automation_running: bool,
    pub max_concurrency: usize,
    pub counts: BucketCounts,
    /// Executions not yet fully finished, result submission included.
    pub in_flight: usize,
    pub active_sessions: usize,
    pub handler_types: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeStatistics {
    pub completed: usize,
    pub failed: usize,
    pub total_duration_ms: u64,
}

/// Aggregates over the terminal buckets still retained by the queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatistics {
    pub counts: BucketCounts,
    /// `completed / (completed + failed)`, 0 when nothing finished.
    pub success_rate: f64,
    pub average_duration_ms: f64,
    pub total_earnings: f64,
    pub by_type: BTreeMap<String, TypeStatistics>,
}

impl TaskStatistics {
    pub fn from_snapshot(snapshot: &QueueSnapshot) -> Self {
        let mut stats = TaskStatistics {
            counts: snapshot.counts,
            ..Default::default()
        };

        let mut total_duration = 0u64;
        let mut finished = 0usize;

        let terminal = snapshot
            .completed
            .iter()
            .map(|r| (r, true))
            .chain(snapshot.failed.iter().map(|r| (r, false)));
        for (record, ok) in terminal {
            let duration = duration_of(record);
            total_duration += duration;
            finished += 1;

            let entry = stats
                .by_type
                .entry(record.task.task_type.to_string())
                .or_default();
            entry.total_duration_ms += duration;
            if ok {
                entry.completed += 1;
            } else {
                entry.failed += 1;
            }

            if let Some(result) = &record.result {
                stats.total_earnings += result.metrics.estimated_earnings;
            }
        }

        if finished > 0 {
            stats.success_rate = snapshot.completed.len() as f64 / finished as f64;
            stats.average_duration_ms = total_duration as f64 / finished as f64;
        }
        stats
    }
}

fn duration_of(record: &TaskRecord) -> u64 {
    record
        .result
        .as_ref()
        .map(|r: &TaskResult| r.duration_ms)
        .unwrap_or(0)
}
