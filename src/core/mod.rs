//! Core queue abstractions: task model, store contract, retry, dispatch and workers.

pub mod analytics;
pub mod dispatcher;
pub mod error;
pub mod processor;
pub mod provider;
pub mod retry;
pub mod spawn;
pub mod store;
pub mod task;
pub mod worker;
pub mod worker_pool;

pub use analytics::{
    build_delivery_events, AnalyticsChannel, DeliveryEvent, DeliveryEventSink,
    InMemoryDeliveryEventSink,
};
pub use dispatcher::Dispatcher;
pub use error::{AppResult, ProviderError, QueueError};
pub use processor::QueueProcessor;
pub use provider::{DeliveryProvider, OutboundMessage, SendReceipt};
pub use retry::{RetryDecision, RetryPolicy};
pub use spawn::Spawn;
pub use store::QueueStore;
pub use task::{
    NewTask, ProcessingResult, QueueStats, Recipients, TaskFilter, TaskRecord, TaskStatus,
};
pub use worker::{DeliveryContext, TaskOutcome, WorkerReport};
pub use worker_pool::WorkerPool;
