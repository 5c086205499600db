//! Tests for error types

use outbound_queue::core::{ProviderError, QueueError, TaskStatus};
use uuid::Uuid;

#[test]
fn test_validation_error() {
    let err = QueueError::Validation("missing recipient".to_string());
    assert_eq!(format!("{}", err), "validation error: missing recipient");
}

#[test]
fn test_invalid_state_error() {
    let id = Uuid::nil();
    let err = QueueError::InvalidState {
        id,
        status: TaskStatus::Sending,
        operation: "cancel",
    };
    assert_eq!(
        format!("{}", err),
        format!("invalid state: cannot cancel task {id} in status sending")
    );
}

#[test]
fn test_lifecycle_errors() {
    assert_eq!(format!("{}", QueueError::AlreadyRunning), "processor already running");
    assert_eq!(format!("{}", QueueError::NotRunning), "processor not running");
}

#[test]
fn test_provider_error_mapping() {
    let err: QueueError = ProviderError::NotConfigured("owner has no provider".into()).into();
    assert!(matches!(err, QueueError::Configuration(_)));

    let err: QueueError = ProviderError::Delivery("550 mailbox unavailable".into()).into();
    assert_eq!(format!("{}", err), "provider error: 550 mailbox unavailable");

    let err: QueueError = ProviderError::Timeout("30s".into()).into();
    assert!(matches!(err, QueueError::Timeout(_)));
}
