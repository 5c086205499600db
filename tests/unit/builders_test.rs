//! Tests for processor builder

use std::sync::Arc;
use std::time::Duration;

use outbound_queue::builders::QueueProcessorBuilder;
use outbound_queue::config::{QueueConfig, StoreBackendConfig};
use outbound_queue::core::QueueError;
use outbound_queue::infra::InMemoryQueueStore;
use outbound_queue::runtime::TokioSpawner;

use crate::common::MockProvider;

fn builder() -> QueueProcessorBuilder {
    QueueProcessorBuilder::new(
        Arc::new(InMemoryQueueStore::new()),
        Arc::new(MockProvider::accepting()),
    )
}

#[tokio::test]
async fn test_builder_defaults() {
    let b = builder();
    assert_eq!(b.config(), &QueueConfig::default());

    let processor = b.build().unwrap();
    assert!(!processor.is_processing());
    assert_eq!(processor.retry_policy().max_attempts, 5);
    assert_eq!(processor.retry_policy().base_delay, Duration::from_secs(300));
}

#[tokio::test]
async fn test_builder_applies_config() {
    let config = QueueConfig::default()
        .with_max_attempts(2)
        .with_base_retry_delay(Duration::from_secs(10));
    let processor = builder().with_config(config).build().unwrap();
    assert_eq!(processor.retry_policy().max_attempts, 2);
    assert_eq!(processor.retry_policy().base_delay, Duration::from_secs(10));
}

#[tokio::test]
async fn test_builder_rejects_invalid_config() {
    let config = QueueConfig::default().with_max_workers(0);
    let result = builder().with_config(config).build();
    assert!(matches!(result, Err(QueueError::Configuration(_))));
}

#[test]
fn test_builder_requires_runtime() {
    // Outside a runtime no spawner can be discovered.
    let result = builder().build();
    assert!(matches!(result, Err(QueueError::Configuration(_))));
}

#[test]
fn test_builder_with_explicit_spawner() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let spawner = TokioSpawner::new(runtime.handle().clone());
    let processor = builder().with_spawner(spawner).build().unwrap();

    runtime.block_on(async {
        processor.start().unwrap();
        assert!(matches!(processor.start(), Err(QueueError::AlreadyRunning)));
        processor.stop().unwrap();
        assert!(matches!(processor.stop(), Err(QueueError::NotRunning)));
    });
}

#[tokio::test]
async fn test_from_config_in_memory() {
    let config = QueueConfig::default().with_store(StoreBackendConfig::InMemory);
    let processor = QueueProcessorBuilder::from_config(config, Arc::new(MockProvider::accepting()))
        .await
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(processor.stats(None).await.unwrap().total, 0);
}

#[cfg(not(feature = "postgres"))]
#[tokio::test]
async fn test_from_config_postgres_without_feature() {
    let config = QueueConfig::default().with_store(StoreBackendConfig::Postgres {
        url: "postgres://localhost/queue".into(),
        max_connections: 5,
    });
    let result = QueueProcessorBuilder::from_config(config, Arc::new(MockProvider::accepting())).await;
    assert!(matches!(result, Err(QueueError::Configuration(_))));
}
