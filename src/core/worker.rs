//! Per-task delivery: claim, resolve provider, send, record outcome.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::core::analytics::{build_delivery_events, AnalyticsChannel};
use crate::core::error::{ProviderError, QueueError};
use crate::core::provider::{DeliveryProvider, OutboundMessage};
use crate::core::retry::{RetryDecision, RetryPolicy};
use crate::core::store::QueueStore;
use crate::core::task::{TaskRecord, TaskStatus};
use crate::util::clock::Clock;
use crate::util::serde::{ProviderId, TaskId};

/// Collaborators every worker shares.
pub struct DeliveryContext {
    /// System of record.
    pub store: Arc<dyn QueueStore>,
    /// Delivery mechanism.
    pub provider: Arc<dyn DeliveryProvider>,
    /// Time source for every mutation.
    pub clock: Arc<dyn Clock>,
    /// Backoff applied after failed attempts.
    pub retry: RetryPolicy,
    /// Best-effort delivery analytics.
    pub analytics: AnalyticsChannel,
    /// Deadline for a single provider call.
    pub task_timeout: Duration,
}

/// How one task ended this round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Delivered and marked `Sent`.
    Sent,
    /// Attempt failed; the task is `Failed` or rescheduled.
    Failed(String),
    /// Not processed this round (claimed elsewhere, cancelled, not due).
    Skipped(String),
}

/// Result message a worker posts for each task it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    /// Task the report is about.
    pub task_id: TaskId,
    /// What happened.
    pub outcome: TaskOutcome,
}

/// Pull task ids until the job channel drains, reporting each outcome.
pub async fn run_worker(
    worker_id: usize,
    ctx: Arc<DeliveryContext>,
    jobs: flume::Receiver<TaskId>,
    results: flume::Sender<WorkerReport>,
) {
    debug!(worker_id, "Delivery worker started");
    while let Ok(task_id) = jobs.recv_async().await {
        let outcome = deliver(&ctx, task_id).await;
        if results
            .send_async(WorkerReport { task_id, outcome })
            .await
            .is_err()
        {
            debug!(worker_id, "Result collector gone, worker exiting");
            break;
        }
    }
    debug!(worker_id, "Delivery worker finished");
}

/// Run one delivery attempt for `id`.
#[tracing::instrument(skip_all, fields(task_id = %id))]
pub async fn deliver(ctx: &DeliveryContext, id: TaskId) -> TaskOutcome {
    match ctx.store.claim(id, ctx.clock.now()).await {
        Ok(true) => {}
        Ok(false) => {
            debug!("Task already claimed or no longer eligible");
            return TaskOutcome::Skipped("already claimed or not eligible".into());
        }
        Err(e) => {
            warn!(error = %e, "Claim failed");
            return TaskOutcome::Skipped(format!("claim failed: {e}"));
        }
    }

    let record = match ctx.store.get(id).await {
        Ok(Some(record)) => record,
        Ok(None) => return TaskOutcome::Skipped("task removed after claim".into()),
        Err(e) => {
            error!(error = %e, "Failed to load claimed task");
            let reason = e.to_string();
            release_claim(ctx, id, &reason).await;
            return TaskOutcome::Failed(reason);
        }
    };

    let provider_id = match resolve_provider(ctx, &record).await {
        Ok(provider_id) => provider_id,
        Err(e) => {
            let message = e.to_string();
            warn!(error = %message, "Provider resolution failed, not retrying");
            mark_failed(ctx, id, &message).await;
            return TaskOutcome::Failed(message);
        }
    };

    let message = OutboundMessage::from(&record);
    match send(ctx, provider_id, &message).await {
        Ok(()) => match record_success(ctx, &record).await {
            Ok(attempts) => {
                info!(attempts, "Task delivered");
                TaskOutcome::Sent
            }
            Err(e) => {
                error!(error = %e, "Delivered but failed to record success");
                TaskOutcome::Failed(e.to_string())
            }
        },
        Err(ProviderError::NotConfigured(detail)) => {
            let reason = QueueError::Configuration(detail).to_string();
            match record_terminal_failure(ctx, id, &reason).await {
                Ok(attempts) => warn!(attempts, error = %reason, "Provider not configured, not retrying"),
                Err(e) => {
                    error!(error = %e, "Failed to record configuration failure");
                    mark_failed(ctx, id, &reason).await;
                }
            }
            TaskOutcome::Failed(reason)
        }
        Err(e) => {
            let reason = QueueError::from(e).to_string();
            if let Err(e) = record_failure(ctx, id, &reason).await {
                error!(error = %e, "Failed to record delivery failure");
                release_claim(ctx, id, &reason).await;
            }
            TaskOutcome::Failed(reason)
        }
    }
}

async fn resolve_provider(ctx: &DeliveryContext, record: &TaskRecord) -> Result<ProviderId, QueueError> {
    if let Some(provider_id) = record.provider_id {
        return Ok(provider_id);
    }
    ctx.provider
        .default_provider(record.owner_id)
        .await
        .map_err(|e| QueueError::Configuration(e.to_string()))
}

/// Provider call bounded by the task deadline. A rejected receipt becomes
/// [`ProviderError::Delivery`], an expired deadline [`ProviderError::Timeout`].
async fn send(
    ctx: &DeliveryContext,
    provider_id: ProviderId,
    message: &OutboundMessage,
) -> Result<(), ProviderError> {
    match tokio::time::timeout(ctx.task_timeout, ctx.provider.send(provider_id, message)).await {
        Ok(Ok(receipt)) if receipt.success => Ok(()),
        Ok(Ok(receipt)) => Err(ProviderError::Delivery(
            receipt
                .error
                .unwrap_or_else(|| "provider reported failure".into()),
        )),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(ProviderError::Timeout(format!(
            "provider did not respond within {}ms",
            ctx.task_timeout.as_millis()
        ))),
    }
}

async fn record_success(ctx: &DeliveryContext, record: &TaskRecord) -> Result<u32, QueueError> {
    let now = ctx.clock.now();
    let attempts = ctx.store.increment_attempts(record.id, now).await?;
    ctx.store
        .update_status(record.id, TaskStatus::Sent, None, now)
        .await?;
    for event in build_delivery_events(record, now) {
        ctx.analytics.emit(event);
    }
    Ok(attempts)
}

/// Count a failed attempt on a `Sending` task, mark it `Failed`, then reschedule it
/// if the retry policy allows.
///
/// # Errors
/// Store errors from any of the three mutations.
pub async fn record_failure(
    ctx: &DeliveryContext,
    id: TaskId,
    reason: &str,
) -> Result<RetryDecision, QueueError> {
    let now = ctx.clock.now();
    let attempts = ctx.store.increment_attempts(id, now).await?;
    ctx.store
        .update_status(id, TaskStatus::Failed, Some(reason), now)
        .await?;
    let decision = ctx.retry.decide(attempts, now);
    match decision {
        RetryDecision::RetryAt(at) => {
            ctx.store.reschedule(id, at, now).await?;
            warn!(task_id = %id, attempts, retry_at = %at, error = %reason, "Delivery failed, retry scheduled");
        }
        RetryDecision::Exhausted => {
            warn!(task_id = %id, attempts, error = %reason, "Delivery failed, attempts exhausted");
        }
    }
    Ok(decision)
}

/// Count the attempt and leave the task `Failed` without consulting the retry policy.
async fn record_terminal_failure(
    ctx: &DeliveryContext,
    id: TaskId,
    reason: &str,
) -> Result<u32, QueueError> {
    let now = ctx.clock.now();
    let attempts = ctx.store.increment_attempts(id, now).await?;
    ctx.store
        .update_status(id, TaskStatus::Failed, Some(reason), now)
        .await?;
    Ok(attempts)
}

/// Best-effort exit from `Sending` when the outcome could not be recorded normally.
/// Returns whether this call moved the task to `Failed`.
async fn mark_failed(ctx: &DeliveryContext, id: TaskId, reason: &str) -> bool {
    match ctx
        .store
        .update_status(id, TaskStatus::Failed, Some(reason), ctx.clock.now())
        .await
    {
        Ok(()) => true,
        Err(QueueError::InvalidState { .. }) => false,
        Err(e) => {
            error!(task_id = %id, error = %e, "Failed to release claimed task");
            false
        }
    }
}

/// [`mark_failed`], then reschedule one base delay out with no attempt counted.
async fn release_claim(ctx: &DeliveryContext, id: TaskId, reason: &str) {
    if !mark_failed(ctx, id, reason).await {
        return;
    }
    let now = ctx.clock.now();
    let Some(at) = chrono::Duration::from_std(ctx.retry.backoff(0))
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
    else {
        return;
    };
    match ctx.store.reschedule(id, at, now).await {
        Ok(()) => warn!(task_id = %id, retry_at = %at, error = %reason, "Released claimed task for retry"),
        Err(e) => error!(task_id = %id, error = %e, "Released task stays failed"),
    }
}
