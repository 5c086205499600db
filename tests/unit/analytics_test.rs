//! Tests for delivery analytics

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use outbound_queue::core::{
    build_delivery_events, AnalyticsChannel, DeliveryEventSink, InMemoryDeliveryEventSink,
    NewTask,
};
use outbound_queue::runtime::TokioSpawner;
use uuid::Uuid;

#[test]
fn test_one_event_per_primary_recipient() {
    let now = Utc::now();
    let form = Uuid::new_v4();
    let record = NewTask::new(Uuid::new_v4(), ["a@example.com", "b@example.com"], "Receipt")
        .with_cc(["audit@example.com"])
        .with_text_body("thanks")
        .with_origin(form, None)
        .into_record(now)
        .unwrap();

    let events = build_delivery_events(&record, now);
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.task_id == record.id && e.form_id == Some(form)));
    let recipients: Vec<_> = events.iter().map(|e| e.recipient.as_str()).collect();
    assert_eq!(recipients, vec!["a@example.com", "b@example.com"]);
    assert_ne!(events[0].event_id, events[1].event_id);
}

#[tokio::test]
async fn test_in_memory_sink_keeps_latest() {
    let sink = InMemoryDeliveryEventSink::new(2);
    let record = NewTask::new(Uuid::new_v4(), ["a@example.com", "b@example.com", "c@example.com"], "s")
        .with_text_body("b")
        .into_record(Utc::now())
        .unwrap();

    for event in build_delivery_events(&record, Utc::now()) {
        sink.record(event).await.unwrap();
    }

    let kept: Vec<_> = sink.events().into_iter().map(|e| e.recipient).collect();
    assert_eq!(kept, vec!["b@example.com".to_string(), "c@example.com".to_string()]);
}

#[test]
fn test_disabled_channel_discards() {
    let channel = AnalyticsChannel::disabled();
    assert!(!channel.is_enabled());
    let record = NewTask::new(Uuid::new_v4(), ["a@example.com"], "s")
        .with_text_body("b")
        .into_record(Utc::now())
        .unwrap();
    for event in build_delivery_events(&record, Utc::now()) {
        assert!(!channel.emit(event));
    }
    assert_eq!(channel.dropped(), 0);
}

#[tokio::test]
async fn test_channel_forwards_to_sink() {
    let sink = Arc::new(InMemoryDeliveryEventSink::new(16));
    let spawner = TokioSpawner::try_current().unwrap();
    let channel = AnalyticsChannel::spawn(sink.clone(), 8, &spawner);
    assert!(channel.is_enabled());

    let record = NewTask::new(Uuid::new_v4(), ["a@example.com"], "s")
        .with_text_body("b")
        .into_record(Utc::now())
        .unwrap();
    for event in build_delivery_events(&record, Utc::now()) {
        assert!(channel.emit(event));
    }

    for _ in 0..50 {
        if !sink.events().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(sink.events().len(), 1);
    assert_eq!(channel.dropped(), 0);
}
