//! Builders that assemble a queue processor from configuration and collaborators.

pub mod processor_builder;

pub use processor_builder::QueueProcessorBuilder;
