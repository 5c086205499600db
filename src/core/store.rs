//! Queue store abstraction.
//!
//! The store is the system of record and the only coordination point between
//! dispatchers. Implementations must apply every mutation atomically per task:
//! conditional transitions and attempt increments happen inside the backend, never
//! as read-modify-write in the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::error::QueueError;
use crate::core::task::{QueueStats, TaskFilter, TaskRecord, TaskStatus};
use crate::util::serde::{OwnerId, TaskId};

/// Persistence contract for task records.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a fully formed record.
    ///
    /// # Errors
    /// [`QueueError::Persistence`] on storage failure or a duplicate id.
    async fn enqueue(&self, record: TaskRecord) -> Result<(), QueueError>;

    /// Fetch one record.
    ///
    /// # Errors
    /// [`QueueError::Persistence`] on storage failure.
    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, QueueError>;

    /// Records matching `filter`, ordered by priority descending then `scheduled_at`
    /// ascending. A `limit` of zero means no limit.
    ///
    /// # Errors
    /// [`QueueError::Persistence`] on storage failure.
    async fn list(
        &self,
        filter: &TaskFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TaskRecord>, QueueError>;

    /// Ids of up to `limit` tasks eligible at `now`, highest priority first, then
    /// earliest `scheduled_at`, then earliest `created_at`.
    ///
    /// # Errors
    /// [`QueueError::Persistence`] on storage failure.
    async fn fetch_ready_batch(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TaskId>, QueueError>;

    /// Conditionally move an eligible task to `Sending`. Returns `false` when the task
    /// was already claimed, cancelled, not yet due, or does not exist.
    ///
    /// # Errors
    /// [`QueueError::Persistence`] on storage failure.
    async fn claim(&self, id: TaskId, now: DateTime<Utc>) -> Result<bool, QueueError>;

    /// Set `status` and `last_error`, maintaining `sent_at` and `updated_at`.
    ///
    /// # Errors
    /// [`QueueError::NotFound`], [`QueueError::InvalidState`] for an illegal edge, or
    /// [`QueueError::Persistence`].
    async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError>;

    /// Atomically add one attempt and return the new count.
    ///
    /// # Errors
    /// [`QueueError::NotFound`] or [`QueueError::Persistence`].
    async fn increment_attempts(&self, id: TaskId, now: DateTime<Utc>) -> Result<u32, QueueError>;

    /// Cancel a `Pending` or `Scheduled` task.
    ///
    /// # Errors
    /// [`QueueError::InvalidState`] from any other status, [`QueueError::NotFound`],
    /// or [`QueueError::Persistence`].
    async fn cancel(&self, id: TaskId, now: DateTime<Utc>) -> Result<(), QueueError>;

    /// Move a `Failed` task back to `Scheduled` at `at`, clearing `last_error`.
    ///
    /// # Errors
    /// [`QueueError::InvalidState`] unless the task is `Failed`, [`QueueError::NotFound`],
    /// or [`QueueError::Persistence`].
    async fn reschedule(
        &self,
        id: TaskId,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError>;

    /// Per-status counts, optionally for a single owner.
    ///
    /// # Errors
    /// [`QueueError::Persistence`] on storage failure.
    async fn stats(&self, owner: Option<OwnerId>) -> Result<QueueStats, QueueError>;

    /// Delete records in `statuses` created before `cutoff`; returns the count removed.
    ///
    /// # Errors
    /// [`QueueError::Validation`] when `statuses` names a non-terminal status, or
    /// [`QueueError::Persistence`].
    async fn purge_older_than(
        &self,
        cutoff: DateTime<Utc>,
        statuses: &[TaskStatus],
    ) -> Result<u64, QueueError>;
}

/// Reject purge requests that would delete live work.
///
/// # Errors
/// [`QueueError::Validation`] naming the first offending status.
pub fn ensure_retention_statuses(statuses: &[TaskStatus]) -> Result<(), QueueError> {
    match statuses.iter().find(|s| !s.is_retention_eligible()) {
        Some(status) => Err(QueueError::Validation(format!(
            "cannot purge tasks in non-terminal status {status}"
        ))),
        None => Ok(()),
    }
}
