//! API-facing request/response models for transport layers built on the processor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{
    NewTask, QueueError, QueueProcessor, QueueStats, Spawn, TaskRecord, TaskStatus,
};
use crate::util::serde::{OwnerId, TaskId};

/// Task status response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    /// Task identifier.
    pub task_id: TaskId,
    /// Owning tenant.
    pub owner_id: OwnerId,
    /// Current status.
    pub status: TaskStatus,
    /// Delivery attempts so far.
    pub attempts: u32,
    /// Next eligible dispatch time.
    pub scheduled_at: DateTime<Utc>,
    /// Delivery time, once sent.
    pub sent_at: Option<DateTime<Utc>>,
    /// Failure reason of the last attempt.
    pub reason: Option<String>,
}

impl From<&TaskRecord> for TaskStatusResponse {
    fn from(record: &TaskRecord) -> Self {
        Self {
            task_id: record.id,
            owner_id: record.owner_id,
            status: record.status,
            attempts: record.attempts,
            scheduled_at: record.scheduled_at,
            sent_at: record.sent_at,
            reason: record.last_error.clone(),
        }
    }
}

/// Processor snapshot for dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorStatus {
    /// Whether the dispatch loop is running.
    pub processing: bool,
    /// Per-status counts.
    pub stats: QueueStats,
    /// Analytics events lost so far.
    pub dropped_analytics_events: u64,
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
}

/// Enqueue a task and return its status view.
///
/// # Errors
/// Whatever [`QueueProcessor::enqueue`] returns.
pub async fn submit_task<S: Spawn + Clone>(
    processor: &QueueProcessor<S>,
    task: NewTask,
) -> Result<TaskStatusResponse, QueueError> {
    let record = processor.enqueue(task).await?;
    Ok(TaskStatusResponse::from(&record))
}

/// Current status of one task.
///
/// # Errors
/// [`QueueError::NotFound`] or store errors.
pub async fn task_status<S: Spawn + Clone>(
    processor: &QueueProcessor<S>,
    id: TaskId,
) -> Result<TaskStatusResponse, QueueError> {
    let record = processor.get(id).await?;
    Ok(TaskStatusResponse::from(&record))
}

/// Loop state and queue counts, optionally for one owner.
///
/// # Errors
/// Store errors.
pub async fn processor_status<S: Spawn + Clone>(
    processor: &QueueProcessor<S>,
    owner: Option<OwnerId>,
) -> Result<ProcessorStatus, QueueError> {
    Ok(ProcessorStatus {
        processing: processor.is_processing(),
        stats: processor.stats(owner).await?,
        dropped_analytics_events: processor.dropped_analytics_events(),
    })
}

/// Return a health payload.
#[must_use]
pub const fn health() -> Health {
    Health { ok: true }
}
