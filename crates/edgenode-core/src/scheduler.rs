//! Priority scoring and admission order.
//!
//! `score = weight(priority) * 100 + estimated_revenue * 10 + 50 / max(estimated_duration, 1)`
//!
//! Higher scores are admitted first. Equal scores fall back to enqueue
//! order via a monotonic sequence number, so the order is total and
//! deterministic even when two tasks arrive in the same instant.

use std::cmp::Ordering;

use crate::domain::{Priority, Task, TaskHints};

const PRIORITY_FACTOR: f64 = 100.0;
const REVENUE_FACTOR: f64 = 10.0;
const DURATION_NUMERATOR: f64 = 50.0;

/// Key of the waiting bucket's ordered index.
///
/// Sorts ascending in admission order: the first key is admitted next.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionKey {
    pub score: f64,
    pub seq: u64,
}

impl PartialEq for AdmissionKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for AdmissionKey {}

impl PartialOrd for AdmissionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AdmissionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // higher score first, then lower seq
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PriorityScheduler;

impl PriorityScheduler {
    pub fn score(task: &Task) -> f64 {
        Self::score_parts(task.priority, &task.hints)
    }

    pub fn score_parts(priority: Priority, hints: &TaskHints) -> f64 {
        let revenue = sanitize(hints.estimated_revenue);
        let duration = sanitize(hints.estimated_duration).max(1.0);
        f64::from(priority.weight()) * PRIORITY_FACTOR
            + revenue * REVENUE_FACTOR
            + DURATION_NUMERATOR / duration
    }

    pub fn key(task: &Task, seq: u64) -> AdmissionKey {
        AdmissionKey {
            score: Self::score(task),
            seq,
        }
    }

    /// Order tasks as they would be admitted if enqueued in slice order.
    pub fn order(tasks: &[Task]) -> Vec<Task> {
        let mut keyed: Vec<(AdmissionKey, &Task)> = tasks
            .iter()
            .enumerate()
            .map(|(seq, task)| (Self::key(task, seq as u64), task))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        keyed.into_iter().map(|(_, task)| task.clone()).collect()
    }
}

// NaN hints would poison the ordering; treat them as absent.
fn sanitize(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}
