//! In-memory task queue.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use super::{BucketCounts, QueueSnapshot, TaskRecord};
use crate::domain::{EdgeEvent, ErrorInfo, Priority, Task, TaskHints, TaskId, TaskResult, TaskState};
use crate::error::QueueError;
use crate::ports::{Clock, EventSink};
use crate::scheduler::{AdmissionKey, PriorityScheduler};

/// Queue internals. Every field is only touched with the mutex held.
#[derive(Default)]
struct QueueState {
    /// All records (single source of truth).
    records: HashMap<TaskId, TaskRecord>,

    /// Waiting bucket, in admission order.
    waiting: BTreeMap<AdmissionKey, TaskId>,

    running: HashSet<TaskId>,

    /// Terminal buckets, oldest first.
    completed: VecDeque<TaskId>,
    failed: VecDeque<TaskId>,

    next_seq: u64,
}

impl QueueState {
    fn counts(&self) -> BucketCounts {
        BucketCounts {
            waiting: self.waiting.len(),
            running: self.running.len(),
            completed: self.completed.len(),
            failed: self.failed.len(),
        }
    }

    fn key_of(record: &TaskRecord) -> AdmissionKey {
        AdmissionKey {
            score: record.score,
            seq: record.seq,
        }
    }

    fn pop_next_waiting(&mut self) -> Option<TaskId> {
        let (_, task_id) = self.waiting.pop_first()?;
        Some(task_id)
    }

    fn listing<'a>(&self, ids: impl Iterator<Item = &'a TaskId>) -> Vec<TaskRecord> {
        ids.filter_map(|id| self.records.get(id).cloned()).collect()
    }
}

/// The task queue state machine.
///
/// Four buckets (`waiting`, `running`, `completed`, `failed`); a task id is
/// in exactly one of them. All mutation goes through one async mutex.
/// `changed()` resolves after an enqueue or a terminal transition, which
/// is what the pool's dispatcher waits on.
pub struct TaskQueue {
    state: Mutex<QueueState>,
    notify: Arc<Notify>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
}

impl TaskQueue {
    pub fn new(clock: Arc<dyn Clock>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Arc::new(Notify::new()),
            clock,
            sink,
        }
    }

    /// Insert into `waiting`. Fails if the id is present in any bucket.
    pub async fn enqueue(&self, task: Task) -> Result<(), QueueError> {
        let event = {
            let mut state = self.state.lock().await;
            if state.records.contains_key(&task.id) {
                return Err(QueueError::DuplicateTask(task.id));
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            let key = PriorityScheduler::key(&task, seq);
            let event = EdgeEvent::TaskEnqueued {
                task_id: task.id.clone(),
                task_type: task.task_type.clone(),
                score: key.score,
            };

            let task_id = task.id.clone();
            let record = TaskRecord::new(task, key.score, seq, self.clock.now());
            state.records.insert(task_id.clone(), record);
            state.waiting.insert(key, task_id);
            event
        };

        self.sink.emit(event);
        self.notify.notify_one();
        Ok(())
    }

    /// Move the highest-ordered waiting task to `running`.
    pub async fn admit_next(&self) -> Option<Task> {
        self.admit_within(usize::MAX).await
    }

    /// Like `admit_next`, but only while fewer than `limit` tasks are
    /// running. The capacity check and the move happen under one lock.
    pub async fn admit_within(&self, limit: usize) -> Option<Task> {
        let (task, running) = {
            let mut state = self.state.lock().await;
            if state.running.len() >= limit {
                return None;
            }
            let task_id = state.pop_next_waiting()?;
            let now = self.clock.now();
            let record = state.records.get_mut(&task_id)?;
            record.start(now);
            let task = record.task.clone();
            state.running.insert(task_id);
            (task, state.running.len())
        };

        self.sink.emit(EdgeEvent::TaskAdmitted {
            task_id: task.id.clone(),
            running,
        });
        Some(task)
    }

    /// `running -> completed`, storing the handler's result.
    pub async fn complete(&self, task_id: &TaskId, result: TaskResult) -> Result<(), QueueError> {
        let duration_ms = result.duration_ms;
        self.finish(task_id, TaskState::Completed, Some(result), None)
            .await?;
        self.sink.emit(EdgeEvent::TaskCompleted {
            task_id: task_id.clone(),
            duration_ms,
        });
        Ok(())
    }

    /// `running -> failed`.
    pub async fn fail(&self, task_id: &TaskId, error: ErrorInfo) -> Result<(), QueueError> {
        self.finish(task_id, TaskState::Failed, None, Some(error.clone()))
            .await?;
        self.sink.emit(EdgeEvent::TaskFailed {
            task_id: task_id.clone(),
            error,
        });
        Ok(())
    }

    /// Route a normalized result to `complete` or `fail` by its status.
    pub async fn settle(&self, task_id: &TaskId, result: TaskResult) -> Result<(), QueueError> {
        if result.is_completed() {
            return self.complete(task_id, result).await;
        }
        let error = result
            .error
            .clone()
            .unwrap_or_else(|| ErrorInfo::new("unknown", "task failed without error detail"));
        self.finish(task_id, TaskState::Failed, Some(result), Some(error.clone()))
            .await?;
        self.sink.emit(EdgeEvent::TaskFailed {
            task_id: task_id.clone(),
            error,
        });
        Ok(())
    }

    async fn finish(
        &self,
        task_id: &TaskId,
        to: TaskState,
        result: Option<TaskResult>,
        error: Option<ErrorInfo>,
    ) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock().await;
            let from = state.records.get(task_id).map(|r| r.state);
            let allowed = from.is_some_and(|from| from.can_transition_to(to));
            if !allowed {
                drop(state);
                return Err(self.reject(task_id, from, to));
            }

            let now = self.clock.now();
            if let Some(record) = state.records.get_mut(task_id) {
                record.finish(to, result, error, now);
            }
            state.running.remove(task_id);
            match to {
                TaskState::Completed => state.completed.push_back(task_id.clone()),
                _ => state.failed.push_back(task_id.clone()),
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    fn reject(&self, task_id: &TaskId, from: Option<TaskState>, to: TaskState) -> QueueError {
        self.sink.emit(EdgeEvent::InvalidTransition {
            task_id: task_id.clone(),
            from,
            to,
        });
        QueueError::InvalidTransition {
            task_id: task_id.clone(),
            from,
            to,
        }
    }

    /// Recompute the score of a waiting task. Its FIFO position among equal
    /// scores is kept.
    pub async fn rescore(
        &self,
        task_id: &TaskId,
        priority: Option<Priority>,
        hints: TaskHints,
    ) -> Result<f64, QueueError> {
        let score = {
            let mut state = self.state.lock().await;
            let Some(record) = state.records.get(task_id) else {
                return Err(QueueError::UnknownTask(task_id.clone()));
            };
            if record.state != TaskState::Waiting {
                let from = Some(record.state);
                drop(state);
                return Err(self.reject(task_id, from, TaskState::Waiting));
            }

            let old_key = QueueState::key_of(record);
            state.waiting.remove(&old_key);

            let Some(record) = state.records.get_mut(task_id) else {
                return Err(QueueError::UnknownTask(task_id.clone()));
            };
            if let Some(priority) = priority {
                record.task.priority = priority;
            }
            record.task.hints = hints;
            record.score = PriorityScheduler::score(&record.task);
            let key = QueueState::key_of(record);
            let score = record.score;
            state.waiting.insert(key, task_id.clone());
            score
        };

        self.sink.emit(EdgeEvent::TaskRescored {
            task_id: task_id.clone(),
            score,
        });
        Ok(score)
    }

    /// Drop a terminal record so its id can be enqueued again.
    pub async fn evict(&self, task_id: &TaskId) -> Result<TaskRecord, QueueError> {
        let record = {
            let mut state = self.state.lock().await;
            let Some(current) = state.records.get(task_id).map(|r| r.state) else {
                return Err(QueueError::UnknownTask(task_id.clone()));
            };
            if !current.is_terminal() {
                return Err(QueueError::NotTerminal {
                    task_id: task_id.clone(),
                    state: current,
                });
            }
            match current {
                TaskState::Completed => state.completed.retain(|id| id != task_id),
                _ => state.failed.retain(|id| id != task_id),
            }
            state
                .records
                .remove(task_id)
                .ok_or_else(|| QueueError::UnknownTask(task_id.clone()))?
        };

        self.sink.emit(EdgeEvent::TaskEvicted {
            task_id: task_id.clone(),
        });
        Ok(record)
    }

    /// Evict the oldest terminal records beyond `keep` per bucket.
    /// Returns how many were dropped.
    pub async fn prune_terminal(&self, keep: usize) -> usize {
        let mut state = self.state.lock().await;
        let mut dropped = 0;
        while state.completed.len() > keep {
            if let Some(id) = state.completed.pop_front() {
                state.records.remove(&id);
                dropped += 1;
            }
        }
        while state.failed.len() > keep {
            if let Some(id) = state.failed.pop_front() {
                state.records.remove(&id);
                dropped += 1;
            }
        }
        dropped
    }

    /// Consistent point-in-time view of all four buckets.
    pub async fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock().await;
        let mut running = state.listing(state.running.iter());
        running.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.seq.cmp(&b.seq)));
        QueueSnapshot {
            counts: state.counts(),
            waiting: state.listing(state.waiting.values()),
            running,
            completed: state.listing(state.completed.iter()),
            failed: state.listing(state.failed.iter()),
        }
    }

    pub async fn get(&self, task_id: &TaskId) -> Option<TaskRecord> {
        self.state.lock().await.records.get(task_id).cloned()
    }

    pub async fn state_of(&self, task_id: &TaskId) -> Option<TaskState> {
        self.state.lock().await.records.get(task_id).map(|r| r.state)
    }

    pub async fn counts(&self) -> BucketCounts {
        self.state.lock().await.counts()
    }

    pub async fn running_count(&self) -> usize {
        self.state.lock().await.running.len()
    }

    pub async fn waiting_count(&self) -> usize {
        self.state.lock().await.waiting.len()
    }

    /// Wake whoever is waiting in `changed()`.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Resolves after the next enqueue, terminal transition or `wake()`.
    /// A signal sent while nobody waits is kept for the next caller.
    pub async fn changed(&self) {
        self.notify.notified().await;
    }
}
