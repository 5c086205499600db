//! Tests for configuration validation

use std::time::Duration;

use outbound_queue::config::{QueueConfig, StoreBackendConfig};

#[test]
fn test_queue_config_validation() {
    let valid = QueueConfig::default();
    assert!(valid.validate().is_ok());
}

#[test]
fn test_queue_config_invalid_batch_size() {
    let invalid = QueueConfig::default().with_batch_size(0);
    assert_eq!(
        invalid.validate().unwrap_err(),
        "batch_size must be greater than 0"
    );
}

#[test]
fn test_queue_config_invalid_workers() {
    let invalid = QueueConfig::default().with_max_workers(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_queue_config_invalid_timeout() {
    let invalid = QueueConfig::default().with_result_timeout(Duration::ZERO);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_queue_config_postgres_requires_url() {
    let invalid = QueueConfig::default().with_store(StoreBackendConfig::Postgres {
        url: "  ".into(),
        max_connections: 5,
    });
    assert!(invalid.validate().is_err());
}

#[test]
fn test_queue_config_from_json() {
    let json = r#"{
        "batch_size": 10,
        "max_attempts": 3,
        "base_retry_delay_ms": 1000,
        "dispatch_interval_ms": 500,
        "max_workers": 2,
        "result_timeout_ms": 2000,
        "store": "in_memory"
    }"#;

    let config = QueueConfig::from_json_str(json).unwrap();
    assert_eq!(config.batch_size, 10);
    assert_eq!(config.base_retry_delay(), Duration::from_secs(1));
    assert_eq!(config.analytics_buffer, 1024);
    assert_eq!(config.store, StoreBackendConfig::InMemory);
}

#[test]
fn test_queue_config_from_json_postgres() {
    let json = r#"{ "store": { "postgres": { "url": "postgres://localhost/queue" } } }"#;
    let config = QueueConfig::from_json_str(json).unwrap();
    assert_eq!(
        config.store,
        StoreBackendConfig::Postgres {
            url: "postgres://localhost/queue".into(),
            max_connections: 5,
        }
    );
    assert_eq!(config.batch_size, 50);
}

#[test]
fn test_queue_config_from_json_rejects_invalid() {
    assert!(QueueConfig::from_json_str(r#"{ "max_attempts": 0 }"#).is_err());
    assert!(QueueConfig::from_json_str("not json").is_err());
}
