//! In-memory queue store for development, tests and single-process deployments.

use std::cmp::Reverse;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::core::error::QueueError;
use crate::core::store::{ensure_retention_statuses, QueueStore};
use crate::core::task::{QueueStats, TaskFilter, TaskRecord, TaskStatus};
use crate::util::serde::{OwnerId, TaskId};

/// Store keeping every record in a single map behind one lock.
///
/// Each operation runs under a single lock acquisition, which gives the same
/// per-task atomicity a row-level `UPDATE ... WHERE` gives a database.
#[derive(Default)]
pub struct InMemoryQueueStore {
    tasks: Mutex<HashMap<TaskId, TaskRecord>>,
}

impl InMemoryQueueStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    fn with_task<R>(
        &self,
        id: TaskId,
        f: impl FnOnce(&mut TaskRecord) -> Result<R, QueueError>,
    ) -> Result<R, QueueError> {
        let mut tasks = self.tasks.lock();
        let record = tasks.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        f(record)
    }
}

fn dispatch_order(record: &TaskRecord) -> (Reverse<i32>, DateTime<Utc>, DateTime<Utc>, TaskId) {
    (
        Reverse(record.priority),
        record.scheduled_at,
        record.created_at,
        record.id,
    )
}

fn guarded_transition(
    record: &mut TaskRecord,
    next: TaskStatus,
    error: Option<&str>,
    operation: &'static str,
    now: DateTime<Utc>,
) -> Result<(), QueueError> {
    if !record.status.can_transition_to(next) {
        return Err(QueueError::InvalidState {
            id: record.id,
            status: record.status,
            operation,
        });
    }
    record.transition(next, error, now)
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn enqueue(&self, record: TaskRecord) -> Result<(), QueueError> {
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(&record.id) {
            return Err(QueueError::Persistence(format!(
                "task {} already exists",
                record.id
            )));
        }
        tasks.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, QueueError> {
        Ok(self.tasks.lock().get(&id).cloned())
    }

    async fn list(
        &self,
        filter: &TaskFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TaskRecord>, QueueError> {
        let mut matching: Vec<TaskRecord> = self
            .tasks
            .lock()
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matching.sort_by_key(dispatch_order);
        let limit = if limit == 0 { usize::MAX } else { limit };
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }

    async fn fetch_ready_batch(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TaskId>, QueueError> {
        let tasks = self.tasks.lock();
        let mut ready: Vec<&TaskRecord> = tasks.values().filter(|r| r.is_ready(now)).collect();
        ready.sort_by_key(|r| dispatch_order(r));
        Ok(ready.into_iter().take(limit).map(|r| r.id).collect())
    }

    async fn claim(&self, id: TaskId, now: DateTime<Utc>) -> Result<bool, QueueError> {
        let mut tasks = self.tasks.lock();
        match tasks.get_mut(&id) {
            Some(record) if record.is_ready(now) => {
                record.transition(TaskStatus::Sending, None, now)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        self.with_task(id, |record| {
            guarded_transition(record, status, error, "update status of", now)
        })
    }

    async fn increment_attempts(&self, id: TaskId, now: DateTime<Utc>) -> Result<u32, QueueError> {
        self.with_task(id, |record| {
            record.attempts = record.attempts.saturating_add(1);
            record.updated_at = now;
            Ok(record.attempts)
        })
    }

    async fn cancel(&self, id: TaskId, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.with_task(id, |record| {
            guarded_transition(record, TaskStatus::Cancelled, None, "cancel", now)
        })
    }

    async fn reschedule(
        &self,
        id: TaskId,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        self.with_task(id, |record| {
            guarded_transition(record, TaskStatus::Scheduled, None, "reschedule", now)?;
            record.scheduled_at = at;
            Ok(())
        })
    }

    async fn stats(&self, owner: Option<OwnerId>) -> Result<QueueStats, QueueError> {
        let mut stats = QueueStats::default();
        for record in self.tasks.lock().values() {
            if owner.is_none_or(|o| o == record.owner_id) {
                stats.add(record.status, 1);
            }
        }
        Ok(stats)
    }

    async fn purge_older_than(
        &self,
        cutoff: DateTime<Utc>,
        statuses: &[TaskStatus],
    ) -> Result<u64, QueueError> {
        ensure_retention_statuses(statuses)?;
        let mut tasks = self.tasks.lock();
        let before = tasks.len();
        tasks.retain(|_, r| !(r.created_at < cutoff && statuses.contains(&r.status)));
        Ok((before - tasks.len()) as u64)
    }
}
