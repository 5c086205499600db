//! Delivery analytics side channel.
//!
//! Workers never wait on analytics. Events go into a bounded channel with `try_send`
//! and a single drain task forwards them to the configured sink. A full buffer or a
//! failing sink loses events; delivery outcomes are unaffected.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::error::AppResult;
use crate::core::spawn::Spawn;
use crate::core::task::TaskRecord;
use crate::util::serde::{OwnerId, TaskId};

/// One delivered message to one primary recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryEvent {
    /// Event identifier.
    pub event_id: Uuid,
    /// Task that was delivered.
    pub task_id: TaskId,
    /// Owning tenant.
    pub owner_id: OwnerId,
    /// Originating form.
    pub form_id: Option<Uuid>,
    /// Template used.
    pub template_id: Option<Uuid>,
    /// Recipient address.
    pub recipient: String,
    /// Delivery time.
    pub delivered_at: DateTime<Utc>,
}

/// Build one event per primary recipient of a delivered task.
#[must_use]
pub fn build_delivery_events(record: &TaskRecord, delivered_at: DateTime<Utc>) -> Vec<DeliveryEvent> {
    record
        .recipients
        .to
        .iter()
        .map(|recipient| DeliveryEvent {
            event_id: Uuid::new_v4(),
            task_id: record.id,
            owner_id: record.owner_id,
            form_id: record.form_id,
            template_id: record.template_id,
            recipient: recipient.clone(),
            delivered_at,
        })
        .collect()
}

/// Destination for delivery events.
#[async_trait]
pub trait DeliveryEventSink: Send + Sync + 'static {
    /// Persist or forward one event.
    ///
    /// # Errors
    /// Any error; the drain task logs it and moves on.
    async fn record(&self, event: DeliveryEvent) -> AppResult<()>;
}

/// Bounded in-memory sink for tests and development.
pub struct InMemoryDeliveryEventSink {
    events: Mutex<VecDeque<DeliveryEvent>>,
    max_events: usize,
}

impl InMemoryDeliveryEventSink {
    /// Create a sink that keeps the latest `max_events` events.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events.min(1024))),
            max_events,
        }
    }

    /// Snapshot of stored events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<DeliveryEvent> {
        self.events.lock().iter().cloned().collect()
    }
}

#[async_trait]
impl DeliveryEventSink for InMemoryDeliveryEventSink {
    async fn record(&self, event: DeliveryEvent) -> AppResult<()> {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
        Ok(())
    }
}

/// Producer half of the analytics side channel. Cheap to clone.
#[derive(Clone)]
pub struct AnalyticsChannel {
    tx: Option<flume::Sender<DeliveryEvent>>,
    dropped: Arc<AtomicU64>,
}

impl AnalyticsChannel {
    /// Channel that discards every event.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            tx: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Open a channel of `capacity` events and spawn its drain task.
    ///
    /// The drain task exits once every clone of the returned channel is dropped.
    pub fn spawn<S: Spawn>(sink: Arc<dyn DeliveryEventSink>, capacity: usize, spawner: &S) -> Self {
        let (tx, rx) = flume::bounded::<DeliveryEvent>(capacity.max(1));
        spawner.spawn(async move {
            while let Ok(event) = rx.recv_async().await {
                let task_id = event.task_id;
                if let Err(e) = sink.record(event).await {
                    warn!(task_id = %task_id, error = %e, "Delivery event sink failed");
                }
            }
            debug!("Analytics channel closed");
        });
        Self {
            tx: Some(tx),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue an event without waiting. Returns whether it was accepted.
    pub fn emit(&self, event: DeliveryEvent) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, "Delivery event dropped");
                false
            }
        }
    }

    /// Events dropped because the buffer was full or the drain task was gone.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether events are forwarded anywhere.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }
}
