//! Identifier aliases and priority levels shared across the queue.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a queued delivery task.
pub type TaskId = Uuid;

/// Tenant (user) that owns a task.
pub type OwnerId = Uuid;

/// Identifier of a configured delivery provider.
pub type ProviderId = Uuid;

/// Named priority levels. Tasks store the raw integer, so any `i32` is valid;
/// these are the conventional steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Bulk or digest traffic.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Transactional messages.
    High,
    /// Security and account messages.
    Critical,
}

impl Priority {
    /// Raw integer stored on the task record.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::Low => 0,
            Self::Normal => 5,
            Self::High => 10,
            Self::Critical => 20,
        }
    }
}

impl From<Priority> for i32 {
    fn from(p: Priority) -> Self {
        p.as_i32()
    }
}
