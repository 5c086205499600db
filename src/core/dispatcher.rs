//! Batch selection and hand-off to the worker pool.

use std::sync::Arc;

use tracing::{debug, info};

use crate::core::error::QueueError;
use crate::core::spawn::Spawn;
use crate::core::store::QueueStore;
use crate::core::task::ProcessingResult;
use crate::core::worker_pool::WorkerPool;
use crate::util::clock::Clock;

/// Selects ready tasks and fans them out. Never sends anything itself.
pub struct Dispatcher<S: Spawn> {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    pool: WorkerPool<S>,
    batch_size: usize,
}

impl<S: Spawn> Dispatcher<S> {
    /// Create a dispatcher over `pool`, fetching at most `batch_size` ids per tick.
    pub fn new(
        store: Arc<dyn QueueStore>,
        clock: Arc<dyn Clock>,
        pool: WorkerPool<S>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            clock,
            pool,
            batch_size: batch_size.max(1),
        }
    }

    /// Configured batch ceiling.
    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Run one tick: fetch a ready batch and wait for its outcome.
    ///
    /// # Errors
    /// Only a failure to fetch the batch; per-task failures land in the result.
    #[tracing::instrument(skip(self), fields(batch_size = self.batch_size))]
    pub async fn dispatch_once(&self) -> Result<ProcessingResult, QueueError> {
        let now = self.clock.now();
        let batch = self.store.fetch_ready_batch(now, self.batch_size).await?;
        if batch.is_empty() {
            debug!("No tasks ready");
            return Ok(ProcessingResult::default());
        }

        debug!(tasks = batch.len(), "Dispatching batch");
        let result = self.pool.run_batch(batch).await;
        info!(
            processed = result.processed,
            sent = result.sent,
            failed = result.failed,
            skipped = result.skipped,
            "Batch complete"
        );
        Ok(result)
    }
}
