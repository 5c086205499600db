//! Infrastructure adapters: queue store backends.

pub mod queue;

pub use queue::{connect, InMemoryQueueStore};
#[cfg(feature = "postgres")]
pub use queue::PostgresQueueStore;
