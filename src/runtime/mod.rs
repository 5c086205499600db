//! Runtime adapters and the API surface.

pub mod api;
pub mod tokio_spawner;

pub use api::{health, processor_status, submit_task, task_status, Health, ProcessorStatus, TaskStatusResponse};
pub use tokio_spawner::TokioSpawner;
