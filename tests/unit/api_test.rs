//! Tests for API response helpers

use outbound_queue::core::{QueueError, TaskStatus};
use outbound_queue::runtime::{health, processor_status, submit_task, task_status};
use uuid::Uuid;

use crate::common::{fast_config, harness, task, MockProvider};

#[test]
fn test_health() {
    assert!(health().ok);
}

#[tokio::test]
async fn test_submit_and_query_task() {
    let h = harness(MockProvider::accepting(), fast_config());
    let owner = Uuid::new_v4();

    let submitted = submit_task(&h.processor, task(owner, "Hello")).await.unwrap();
    assert_eq!(submitted.owner_id, owner);
    assert_eq!(submitted.status, TaskStatus::Pending);
    assert_eq!(submitted.attempts, 0);
    assert!(submitted.reason.is_none());

    let fetched = task_status(&h.processor, submitted.task_id).await.unwrap();
    assert_eq!(fetched, submitted);

    let json = serde_json::to_value(&fetched).unwrap();
    assert_eq!(json["status"], "pending");
}

#[tokio::test]
async fn test_task_status_not_found() {
    let h = harness(MockProvider::accepting(), fast_config());
    let missing = Uuid::new_v4();
    assert!(matches!(
        task_status(&h.processor, missing).await,
        Err(QueueError::NotFound(id)) if id == missing
    ));
}

#[tokio::test]
async fn test_processor_status_snapshot() {
    let h = harness(MockProvider::accepting(), fast_config());
    let owner = Uuid::new_v4();
    submit_task(&h.processor, task(owner, "one")).await.unwrap();
    submit_task(&h.processor, task(Uuid::new_v4(), "two")).await.unwrap();

    let status = processor_status(&h.processor, Some(owner)).await.unwrap();
    assert!(!status.processing);
    assert_eq!(status.stats.pending, 1);
    assert_eq!(status.stats.total, 1);
    assert_eq!(status.dropped_analytics_events, 0);

    h.processor.start().unwrap();
    let status = processor_status(&h.processor, None).await.unwrap();
    assert!(status.processing);
    assert_eq!(status.stats.total, 2);
    h.processor.stop().unwrap();
}
