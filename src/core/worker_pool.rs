//! Bounded worker pool for one dispatch batch.
//!
//! Task ids travel through a single MPMC job channel, so each id reaches exactly one
//! worker. Workers post a [`WorkerReport`] per id on a result channel; the collector
//! tallies them into a [`ProcessingResult`].
//!
//! # Deadlines
//!
//! Each provider call is bounded by the task timeout inside the worker. The collector
//! additionally gives up when no report has arrived for `task_timeout + grace`, or as
//! soon as every worker is gone (for instance after a panic). Ids still unreported at
//! that point are counted as failed and, when stuck in `Sending`, recorded as a failed
//! attempt so they re-enter the retry cycle.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::core::spawn::Spawn;
use crate::core::task::{ProcessingResult, TaskStatus};
use crate::core::worker::{record_failure, run_worker, DeliveryContext, TaskOutcome, WorkerReport};
use crate::util::serde::TaskId;

/// Slack added on top of the task timeout before the collector gives up.
pub const DEFAULT_COLLECTOR_GRACE: Duration = Duration::from_millis(250);

/// Spawns `min(max_workers, batch.len())` workers per batch.
pub struct WorkerPool<S: Spawn> {
    ctx: Arc<DeliveryContext>,
    spawner: S,
    max_workers: usize,
    grace: Duration,
}

impl<S: Spawn> WorkerPool<S> {
    /// Create a pool. `max_workers` is clamped to at least one.
    pub fn new(ctx: Arc<DeliveryContext>, spawner: S, max_workers: usize) -> Self {
        Self {
            ctx,
            spawner,
            max_workers: max_workers.max(1),
            grace: DEFAULT_COLLECTOR_GRACE,
        }
    }

    /// Override the collector grace period.
    #[must_use]
    pub const fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Shared delivery collaborators.
    #[must_use]
    pub const fn context(&self) -> &Arc<DeliveryContext> {
        &self.ctx
    }

    /// Worker count that would be used for a batch of `batch_len` ids.
    #[must_use]
    pub fn worker_count(&self, batch_len: usize) -> usize {
        self.max_workers.min(batch_len)
    }

    /// Deliver every id in `batch` and aggregate the outcomes.
    pub async fn run_batch(&self, batch: Vec<TaskId>) -> ProcessingResult {
        let mut result = ProcessingResult {
            processed: batch.len(),
            ..ProcessingResult::default()
        };
        if batch.is_empty() {
            return result;
        }

        let (job_tx, job_rx) = flume::bounded::<TaskId>(batch.len());
        let (report_tx, report_rx) = flume::bounded::<WorkerReport>(batch.len());
        let mut outstanding: HashSet<TaskId> = HashSet::with_capacity(batch.len());
        for id in batch {
            if outstanding.insert(id) && job_tx.try_send(id).is_err() {
                warn!(task_id = %id, "Job channel rejected task");
            }
        }
        drop(job_tx);

        let workers = self.worker_count(outstanding.len());
        debug!(workers, tasks = outstanding.len(), "Spawning delivery workers");
        for worker_id in 0..workers {
            self.spawner.spawn(run_worker(
                worker_id,
                Arc::clone(&self.ctx),
                job_rx.clone(),
                report_tx.clone(),
            ));
        }
        drop(job_rx);
        drop(report_tx);

        let idle_window = self.ctx.task_timeout + self.grace;
        while !outstanding.is_empty() {
            match tokio::time::timeout(idle_window, report_rx.recv_async()).await {
                Ok(Ok(report)) => {
                    if outstanding.remove(&report.task_id) {
                        tally(&mut result, report);
                    }
                }
                Ok(Err(_)) => {
                    warn!(remaining = outstanding.len(), "All workers exited before reporting");
                    break;
                }
                Err(_) => {
                    warn!(
                        remaining = outstanding.len(),
                        idle_ms = u64::try_from(idle_window.as_millis()).unwrap_or(u64::MAX),
                        "Timed out waiting for worker reports"
                    );
                    break;
                }
            }
        }

        for id in outstanding {
            let reason = "processing timeout: no result reported by worker";
            result.failed += 1;
            result.errors.push(format!("task {id}: {reason}"));
            self.recover_unreported(id, reason).await;
        }
        result
    }

    /// Best-effort cleanup for an id whose worker never reported.
    async fn recover_unreported(&self, id: TaskId, reason: &str) {
        match self.ctx.store.get(id).await {
            Ok(Some(record)) if record.status == TaskStatus::Sending => {
                if let Err(e) = record_failure(&self.ctx, id, reason).await {
                    error!(task_id = %id, error = %e, "Failed to record processing timeout");
                }
            }
            Ok(_) => {}
            Err(e) => error!(task_id = %id, error = %e, "Failed to inspect unreported task"),
        }
    }
}

fn tally(result: &mut ProcessingResult, report: WorkerReport) {
    match report.outcome {
        TaskOutcome::Sent => result.sent += 1,
        TaskOutcome::Failed(reason) => {
            result.failed += 1;
            result.errors.push(format!("task {}: {reason}", report.task_id));
        }
        TaskOutcome::Skipped(_) => result.skipped += 1,
    }
}
