//! Configuration models for the queue processor and its store backend.

pub mod queue;

pub use queue::{QueueConfig, StoreBackendConfig, ENV_PREFIX};
