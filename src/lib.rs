//! # Outbound Queue
//!
//! A durable, asynchronous delivery queue for outbound notifications.
//!
//! Producers enqueue messages for immediate or future delivery. A periodic dispatcher
//! selects ready tasks in priority order and fans them out to a bounded pool of workers,
//! which deliver each one through a pluggable [`DeliveryProvider`](core::DeliveryProvider).
//! Failed attempts are retried with exponential backoff until an attempt ceiling is
//! reached.
//!
//! ## Task Lifecycle
//!
//! ```text
//! Pending ──┐                 ┌── Sent
//!           ├── Sending ──────┤
//! Scheduled ┘      ▲          └── Failed ── Scheduled (attempts left)
//!   │              └──────────────────────────┘
//!   └── Cancelled (also from Pending)
//! ```
//!
//! - **Claiming** is a conditional update, so two dispatchers can never send the same
//!   task in the same round.
//! - **Attempts** only grow, once per provider call.
//! - **Retention**: `Sent`, `Failed` and `Cancelled` tasks can be purged by age.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use outbound_queue::builders::QueueProcessorBuilder;
//! use outbound_queue::config::QueueConfig;
//! use outbound_queue::core::NewTask;
//! use outbound_queue::infra::InMemoryQueueStore;
//!
//! let processor = QueueProcessorBuilder::new(Arc::new(InMemoryQueueStore::new()), provider)
//!     .with_config(QueueConfig::from_env()?)
//!     .build()?;
//!
//! processor
//!     .enqueue(NewTask::new(owner_id, ["ada@example.com"], "Welcome").with_text_body("Hi Ada"))
//!     .await?;
//!
//! processor.start()?;          // periodic dispatch
//! let result = processor.process_once().await?; // or drain on demand
//! ```
//!
//! ## Backends
//!
//! - [`InMemoryQueueStore`](infra::InMemoryQueueStore) for tests and single-process use.
//! - `PostgresQueueStore` behind the `postgres` feature.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core queue abstractions: task model, store contract, retry, dispatch and workers.
pub mod core;
/// Configuration models for the processor and store backends.
pub mod config;
/// Builders that assemble a processor from configuration.
pub mod builders;
/// Infrastructure adapters for queue storage.
pub mod infra;
/// Runtime adapters and API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
