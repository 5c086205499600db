//! Shared utilities: clocks, identifier types and tracing setup.

pub mod clock;
pub mod serde;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use serde::{OwnerId, Priority, ProviderId, TaskId};
pub use telemetry::{init_json_tracing, init_tracing};
