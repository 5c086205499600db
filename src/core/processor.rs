//! Queue processor: lifecycle of the dispatch loop plus the operator-facing API.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::config::QueueConfig;
use crate::core::analytics::AnalyticsChannel;
use crate::core::dispatcher::Dispatcher;
use crate::core::error::QueueError;
use crate::core::retry::{RetryDecision, RetryPolicy};
use crate::core::spawn::Spawn;
use crate::core::store::QueueStore;
use crate::core::task::{NewTask, ProcessingResult, QueueStats, TaskFilter, TaskRecord, TaskStatus};
use crate::core::worker::DeliveryContext;
use crate::core::worker_pool::WorkerPool;
use crate::runtime::TokioSpawner;
use crate::util::clock::Clock;
use crate::util::serde::{OwnerId, TaskId};

/// Owns one dispatcher and its periodic loop.
///
/// Construct with [`QueueProcessorBuilder`](crate::builders::QueueProcessorBuilder).
/// Every collaborator is injected; there is no process-wide state.
pub struct QueueProcessor<S: Spawn + Clone = TokioSpawner> {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<Dispatcher<S>>,
    retry: RetryPolicy,
    dispatch_interval: Duration,
    spawner: S,
    analytics: AnalyticsChannel,
    running: RwLock<Option<watch::Sender<bool>>>,
}

impl<S: Spawn + Clone> QueueProcessor<S> {
    pub(crate) fn new(
        ctx: DeliveryContext,
        config: &QueueConfig,
        spawner: S,
    ) -> Self {
        let store = Arc::clone(&ctx.store);
        let clock = Arc::clone(&ctx.clock);
        let retry = ctx.retry;
        let analytics = ctx.analytics.clone();
        let pool = WorkerPool::new(Arc::new(ctx), spawner.clone(), config.max_workers);
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            pool,
            config.batch_size,
        );
        Self {
            store,
            clock,
            dispatcher: Arc::new(dispatcher),
            retry,
            dispatch_interval: config.dispatch_interval(),
            spawner,
            analytics,
            running: RwLock::new(None),
        }
    }

    /// Validate and persist a new task.
    ///
    /// # Errors
    /// [`QueueError::Validation`] for a malformed task, [`QueueError::Persistence`] when
    /// the store rejects it.
    #[tracing::instrument(skip_all, fields(owner_id = %task.owner_id))]
    pub async fn enqueue(&self, task: NewTask) -> Result<TaskRecord, QueueError> {
        let record = task.into_record(self.clock.now())?;
        self.store.enqueue(record.clone()).await?;
        info!(task_id = %record.id, status = %record.status, "Task enqueued");
        Ok(record)
    }

    /// Fetch a task.
    ///
    /// # Errors
    /// [`QueueError::NotFound`] or a store error.
    pub async fn get(&self, id: TaskId) -> Result<TaskRecord, QueueError> {
        self.store.get(id).await?.ok_or(QueueError::NotFound(id))
    }

    /// List tasks, highest priority first. `limit == 0` returns everything.
    ///
    /// # Errors
    /// Store errors.
    pub async fn list(
        &self,
        filter: &TaskFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TaskRecord>, QueueError> {
        self.store.list(filter, limit, offset).await
    }

    /// Per-status counts, optionally for one owner.
    ///
    /// # Errors
    /// Store errors.
    pub async fn stats(&self, owner: Option<OwnerId>) -> Result<QueueStats, QueueError> {
        self.store.stats(owner).await
    }

    /// Start the periodic dispatch loop. The first tick fires one interval from now.
    ///
    /// # Errors
    /// [`QueueError::AlreadyRunning`] if the loop is active.
    pub fn start(&self) -> Result<(), QueueError> {
        let mut running = self.running.write();
        if running.is_some() {
            return Err(QueueError::AlreadyRunning);
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        self.spawner.spawn(dispatch_loop(
            Arc::clone(&self.dispatcher),
            self.dispatch_interval,
            stop_rx,
        ));
        *running = Some(stop_tx);
        info!(
            interval_ms = u64::try_from(self.dispatch_interval.as_millis()).unwrap_or(u64::MAX),
            "Queue processor started"
        );
        Ok(())
    }

    /// Signal the loop to exit without waiting for it. The loop stops collecting an
    /// in-flight batch; each claimed task still records its own outcome in its worker,
    /// and no further tick starts.
    ///
    /// # Errors
    /// [`QueueError::NotRunning`] if the loop is inactive.
    pub fn stop(&self) -> Result<(), QueueError> {
        let stop_tx = self.running.write().take().ok_or(QueueError::NotRunning)?;
        let _ = stop_tx.send(true);
        info!("Queue processor stopped");
        Ok(())
    }

    /// Whether the periodic loop is active.
    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.running.read().is_some()
    }

    /// Run one dispatch tick now and return its aggregate result.
    ///
    /// # Errors
    /// A failure to fetch the batch.
    pub async fn process_once(&self) -> Result<ProcessingResult, QueueError> {
        self.dispatcher.dispatch_once().await
    }

    /// Operator status change along a legal lifecycle edge.
    ///
    /// Moving a task to `Scheduled` goes through [`QueueProcessor::retry`], so the
    /// attempt ceiling holds and `scheduled_at` follows the retry policy.
    ///
    /// # Errors
    /// [`QueueError::InvalidState`], [`QueueError::NotFound`] or store errors.
    pub async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<(), QueueError> {
        if status == TaskStatus::Scheduled {
            return self.retry(id).await.map(|_| ());
        }
        self.store
            .update_status(id, status, error, self.clock.now())
            .await
    }

    /// Count one attempt against a task and return the new total.
    ///
    /// # Errors
    /// [`QueueError::NotFound`] or store errors.
    pub async fn increment_attempts(&self, id: TaskId) -> Result<u32, QueueError> {
        self.store.increment_attempts(id, self.clock.now()).await
    }

    /// Reschedule a `Failed` task that still has attempts left, at the time the retry
    /// policy gives for its attempt count.
    ///
    /// # Errors
    /// [`QueueError::InvalidState`] when the task is not `Failed` or has no attempts
    /// left, [`QueueError::NotFound`], or store errors.
    pub async fn retry(&self, id: TaskId) -> Result<DateTime<Utc>, QueueError> {
        let record = self.get(id).await?;
        if record.status != TaskStatus::Failed {
            return Err(QueueError::InvalidState {
                id,
                status: record.status,
                operation: "retry",
            });
        }
        let now = self.clock.now();
        let RetryDecision::RetryAt(at) = self.retry.decide(record.attempts, now) else {
            return Err(QueueError::InvalidState {
                id,
                status: record.status,
                operation: "retry exhausted",
            });
        };
        self.store.reschedule(id, at, now).await?;
        info!(task_id = %id, retry_at = %at, "Task manually rescheduled");
        Ok(at)
    }

    /// Cancel a task that has not been claimed yet.
    ///
    /// # Errors
    /// [`QueueError::InvalidState`] unless `Pending` or `Scheduled`,
    /// [`QueueError::NotFound`], or store errors.
    pub async fn cancel(&self, id: TaskId) -> Result<(), QueueError> {
        self.store.cancel(id, self.clock.now()).await?;
        info!(task_id = %id, "Task cancelled");
        Ok(())
    }

    /// Delete `Sent`, `Failed` and `Cancelled` tasks created more than
    /// `retention_days` ago.
    ///
    /// # Errors
    /// Store errors.
    pub async fn purge_older_than(&self, retention_days: u32) -> Result<u64, QueueError> {
        // Retention windows reaching past the calendar's start keep everything.
        let cutoff = chrono::Duration::try_days(i64::from(retention_days))
            .and_then(|window| self.clock.now().checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let removed = self
            .store
            .purge_older_than(cutoff, &TaskStatus::RETENTION)
            .await?;
        info!(removed, retention_days, "Purged old tasks");
        Ok(removed)
    }

    /// Retry policy in effect.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Delivery events dropped by the analytics side channel so far.
    #[must_use]
    pub fn dropped_analytics_events(&self) -> u64 {
        self.analytics.dropped()
    }
}

async fn dispatch_loop<S: Spawn>(
    dispatcher: Arc<Dispatcher<S>>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                tokio::select! {
                    biased;
                    _ = stop.changed() => {
                        info!("Stop requested mid-batch, claimed tasks finish in their workers");
                        break;
                    }
                    outcome = dispatcher.dispatch_once() => {
                        if let Err(e) = outcome {
                            error!(error = %e, "Failed to fetch ready batch, retrying next tick");
                        }
                    }
                }
            }
        }
    }
    info!("Dispatch loop exited");
}
