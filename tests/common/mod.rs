//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use outbound_queue::builders::QueueProcessorBuilder;
use outbound_queue::config::QueueConfig;
use outbound_queue::core::{
    DeliveryEventSink, DeliveryProvider, NewTask, OutboundMessage, ProviderError,
    QueueError, QueueProcessor, QueueStats, QueueStore, SendReceipt, Spawn, TaskFilter,
    TaskRecord, TaskStatus,
};
use outbound_queue::infra::InMemoryQueueStore;
use outbound_queue::util::{ManualClock, OwnerId, ProviderId, TaskId};
use parking_lot::Mutex;
use uuid::Uuid;

/// Subject that makes [`MockProvider`] never answer.
pub const HANG: &str = "hang";
/// Subject that makes [`MockProvider`] panic.
pub const PANIC: &str = "panic";

/// How [`MockProvider`] answers ordinary messages.
#[derive(Debug, Clone)]
pub enum Mode {
    /// Accept every message.
    Accept,
    /// Return `ProviderError::Delivery`.
    Error(String),
    /// Return a non-success receipt.
    Reject(String),
    /// Return `ProviderError::NotConfigured`.
    NotConfigured(String),
}

/// Scriptable provider that records every message it was asked to send.
pub struct MockProvider {
    default: Option<ProviderId>,
    mode: Mutex<Mode>,
    calls: AtomicUsize,
    sent: Mutex<Vec<(ProviderId, OutboundMessage)>>,
}

impl MockProvider {
    pub fn new(mode: Mode) -> Self {
        Self {
            default: Some(Uuid::new_v4()),
            mode: Mutex::new(mode),
            calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn accepting() -> Self {
        Self::new(Mode::Accept)
    }

    pub fn failing(reason: &str) -> Self {
        Self::new(Mode::Error(reason.to_owned()))
    }

    /// Provider whose owners have no default configured.
    pub fn without_default(mode: Mode) -> Self {
        Self {
            default: None,
            ..Self::new(mode)
        }
    }

    pub fn set_mode(&self, mode: Mode) {
        *self.mode.lock() = mode;
    }

    pub fn default_id(&self) -> Option<ProviderId> {
        self.default
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(ProviderId, OutboundMessage)> {
        self.sent.lock().clone()
    }

    pub fn sent_subjects(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, m)| m.subject.clone()).collect()
    }
}

#[async_trait]
impl DeliveryProvider for MockProvider {
    async fn default_provider(&self, owner_id: OwnerId) -> Result<ProviderId, ProviderError> {
        self.default.ok_or_else(|| {
            ProviderError::NotConfigured(format!("no default provider for owner {owner_id}"))
        })
    }

    async fn send(
        &self,
        provider_id: ProviderId,
        message: &OutboundMessage,
    ) -> Result<SendReceipt, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match message.subject.as_str() {
            HANG => std::future::pending::<()>().await,
            PANIC => panic!("provider exploded"),
            _ => {}
        }
        let mode = self.mode.lock().clone();
        match mode {
            Mode::Accept => {
                self.sent.lock().push((provider_id, message.clone()));
                Ok(SendReceipt::accepted(format!("msg-{}", Uuid::new_v4())))
            }
            Mode::Error(reason) => Err(ProviderError::Delivery(reason)),
            Mode::Reject(reason) => Ok(SendReceipt::rejected(reason)),
            Mode::NotConfigured(reason) => Err(ProviderError::NotConfigured(reason)),
        }
    }
}

/// Fixed instant so scheduling assertions are exact.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0)
        .single()
        .expect("valid fixed timestamp")
}

/// Config with short timings suitable for tests.
pub fn fast_config() -> QueueConfig {
    QueueConfig::default()
        .with_dispatch_interval(Duration::from_millis(20))
        .with_result_timeout(Duration::from_millis(300))
        .with_base_retry_delay(Duration::from_secs(300))
}

/// A valid task for `owner` with the given subject.
pub fn task(owner: OwnerId, subject: &str) -> NewTask {
    NewTask::new(owner, ["user@example.com"], subject).with_text_body("hello")
}

/// Everything a processor test needs to poke at.
pub struct Harness {
    pub processor: QueueProcessor,
    pub provider: Arc<MockProvider>,
    pub store: Arc<InMemoryQueueStore>,
    pub clock: ManualClock,
}

/// Processor on an in-memory store, a manual clock pinned at [`epoch`], and `provider`.
pub fn harness(provider: MockProvider, config: QueueConfig) -> Harness {
    harness_with_sink(provider, config, None)
}

pub fn harness_with_sink(
    provider: MockProvider,
    config: QueueConfig,
    sink: Option<Arc<dyn DeliveryEventSink>>,
) -> Harness {
    let provider = Arc::new(provider);
    let store = Arc::new(InMemoryQueueStore::new());
    let clock = ManualClock::new(epoch());
    let mut builder = QueueProcessorBuilder::new(store.clone(), provider.clone())
        .with_config(config)
        .with_clock(Arc::new(clock.clone()));
    if let Some(sink) = sink {
        builder = builder.with_analytics_sink(sink);
    }
    let processor = builder.build().expect("processor builds inside a tokio runtime");
    Harness {
        processor,
        provider,
        store,
        clock,
    }
}

/// In-memory store whose next `get` fails once [`FlakyStore::fail_next_get`] is armed.
pub struct FlakyStore {
    pub inner: InMemoryQueueStore,
    fail_get: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryQueueStore::new(),
            fail_get: AtomicBool::new(false),
        }
    }

    pub fn fail_next_get(&self) {
        self.fail_get.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl QueueStore for FlakyStore {
    async fn enqueue(&self, record: TaskRecord) -> Result<(), QueueError> {
        self.inner.enqueue(record).await
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, QueueError> {
        if self.fail_get.swap(false, Ordering::SeqCst) {
            return Err(QueueError::Persistence("connection reset".into()));
        }
        self.inner.get(id).await
    }

    async fn list(
        &self,
        filter: &TaskFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TaskRecord>, QueueError> {
        self.inner.list(filter, limit, offset).await
    }

    async fn fetch_ready_batch(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TaskId>, QueueError> {
        self.inner.fetch_ready_batch(now, limit).await
    }

    async fn claim(&self, id: TaskId, now: DateTime<Utc>) -> Result<bool, QueueError> {
        self.inner.claim(id, now).await
    }

    async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        self.inner.update_status(id, status, error, now).await
    }

    async fn increment_attempts(&self, id: TaskId, now: DateTime<Utc>) -> Result<u32, QueueError> {
        self.inner.increment_attempts(id, now).await
    }

    async fn cancel(&self, id: TaskId, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.inner.cancel(id, now).await
    }

    async fn reschedule(
        &self,
        id: TaskId,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        self.inner.reschedule(id, at, now).await
    }

    async fn stats(&self, owner: Option<OwnerId>) -> Result<QueueStats, QueueError> {
        self.inner.stats(owner).await
    }

    async fn purge_older_than(
        &self,
        cutoff: DateTime<Utc>,
        statuses: &[TaskStatus],
    ) -> Result<u64, QueueError> {
        self.inner.purge_older_than(cutoff, statuses).await
    }
}

/// Tokio spawner that keeps every join handle, in spawn order.
#[derive(Clone, Default)]
pub struct RecordingSpawner {
    handles: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl RecordingSpawner {
    /// Whether the `index`-th spawned future has completed.
    pub fn is_finished(&self, index: usize) -> bool {
        self.handles.lock().get(index).is_some_and(tokio::task::JoinHandle::is_finished)
    }
}

impl Spawn for RecordingSpawner {
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handles.lock().push(tokio::spawn(fut));
    }
}
