//! Error types for queue operations.

use thiserror::Error;

use crate::core::task::TaskStatus;
use crate::util::serde::TaskId;

/// Errors produced by queue components.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Input rejected before anything was persisted.
    #[error("validation error: {0}")]
    Validation(String),
    /// Storage backend failure with context.
    #[error("persistence error: {0}")]
    Persistence(String),
    /// Operation not permitted from the task's current status.
    #[error("invalid state: cannot {operation} task {id} in status {status}")]
    InvalidState {
        /// Task the operation targeted.
        id: TaskId,
        /// Status the task was in.
        status: TaskStatus,
        /// Operation that was attempted.
        operation: &'static str,
    },
    /// No task with the given identifier.
    #[error("task not found: {0}")]
    NotFound(TaskId),
    /// Provider rejected or failed the delivery.
    #[error("provider error: {0}")]
    Provider(String),
    /// Missing or invalid configuration (e.g. no provider for the owner).
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A deadline elapsed before the work completed.
    #[error("timeout: {0}")]
    Timeout(String),
    /// `start` called while the processor loop is active.
    #[error("processor already running")]
    AlreadyRunning,
    /// `stop` called while the processor loop is inactive.
    #[error("processor not running")]
    NotRunning,
}

impl From<ProviderError> for QueueError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotConfigured(msg) => Self::Configuration(msg),
            ProviderError::Delivery(msg) => Self::Provider(msg),
            ProviderError::Timeout(msg) => Self::Timeout(msg),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Errors returned by a [`DeliveryProvider`](crate::core::provider::DeliveryProvider).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// No usable provider is configured; retrying will not help.
    #[error("provider not configured: {0}")]
    NotConfigured(String),
    /// The send itself failed; eligible for retry.
    #[error("delivery failed: {0}")]
    Delivery(String),
    /// The provider did not answer in time.
    #[error("provider timed out: {0}")]
    Timeout(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
