//! Behaviour every `QueueStore` backend must share.
//!
//! The Postgres run needs the `postgres` feature and a reachable `DATABASE_URL`:
//! `cargo test --features postgres -- --ignored`.

use chrono::{DateTime, Duration, TimeZone, Utc};
use outbound_queue::core::{NewTask, QueueError, QueueStore, TaskFilter, TaskStatus};
use outbound_queue::infra::InMemoryQueueStore;
use outbound_queue::util::{OwnerId, Priority};
use uuid::Uuid;

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2001, 3, 1, 9, 0, 0).unwrap()
}

fn new_task(owner: OwnerId, subject: &str) -> NewTask {
    NewTask::new(owner, ["reader@example.com"], subject).with_text_body("body")
}

async fn exercise_contract(store: &dyn QueueStore) {
    let owner = Uuid::new_v4();
    let now = base();

    // ========================================================================
    // Ordering and readiness
    // ========================================================================

    let low = new_task(owner, "low").with_priority(Priority::Low).into_record(now).unwrap();
    let high = new_task(owner, "high")
        .with_priority(Priority::High)
        .into_record(now + Duration::seconds(1))
        .unwrap();
    let later = new_task(owner, "later")
        .with_scheduled_at(now + Duration::hours(1))
        .into_record(now)
        .unwrap();
    for record in [&low, &high, &later] {
        store.enqueue(record.clone()).await.unwrap();
    }
    assert!(matches!(
        store.enqueue(low.clone()).await,
        Err(QueueError::Persistence(_))
    ));

    let probe = now + Duration::seconds(5);
    let ready: Vec<_> = store
        .fetch_ready_batch(probe, 100)
        .await
        .unwrap()
        .into_iter()
        .filter(|id| [low.id, high.id, later.id].contains(id))
        .collect();
    assert_eq!(ready, vec![high.id, low.id]);

    let listed = store.list(&TaskFilter::owner(owner), 0, 0).await.unwrap();
    assert_eq!(listed.len(), 3);
    assert_eq!(listed[0].id, high.id);
    let paged = store.list(&TaskFilter::owner(owner), 1, 1).await.unwrap();
    assert_eq!(paged.len(), 1);
    let scheduled = store
        .list(&TaskFilter::owner(owner).with_status(TaskStatus::Scheduled), 0, 0)
        .await
        .unwrap();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].id, later.id);

    // ========================================================================
    // Claim, attempts and status edges
    // ========================================================================

    assert!(store.claim(high.id, probe).await.unwrap());
    assert!(!store.claim(high.id, probe).await.unwrap());
    assert!(!store.claim(later.id, probe).await.unwrap());
    assert!(!store.claim(Uuid::new_v4(), probe).await.unwrap());

    assert_eq!(store.increment_attempts(high.id, probe).await.unwrap(), 1);
    store
        .update_status(high.id, TaskStatus::Sent, None, probe)
        .await
        .unwrap();
    let sent = store.get(high.id).await.unwrap().unwrap();
    assert_eq!(sent.status, TaskStatus::Sent);
    assert_eq!(sent.attempts, 1);
    assert_eq!(sent.sent_at, Some(probe));

    assert!(matches!(
        store.update_status(high.id, TaskStatus::Pending, None, probe).await,
        Err(QueueError::InvalidState { .. })
    ));
    assert!(matches!(
        store.cancel(high.id, probe).await,
        Err(QueueError::InvalidState { .. })
    ));

    assert!(store.claim(low.id, probe).await.unwrap());
    assert_eq!(store.increment_attempts(low.id, probe).await.unwrap(), 1);
    store
        .update_status(low.id, TaskStatus::Failed, Some("mailbox full"), probe)
        .await
        .unwrap();
    let failed = store.get(low.id).await.unwrap().unwrap();
    assert_eq!(failed.last_error.as_deref(), Some("mailbox full"));
    assert!(failed.sent_at.is_none());

    let retry_at = probe + Duration::minutes(5);
    store.reschedule(low.id, retry_at, probe).await.unwrap();
    let rescheduled = store.get(low.id).await.unwrap().unwrap();
    assert_eq!(rescheduled.status, TaskStatus::Scheduled);
    assert_eq!(rescheduled.scheduled_at, retry_at);
    assert!(rescheduled.last_error.is_none());
    assert!(matches!(
        store.reschedule(low.id, retry_at, probe).await,
        Err(QueueError::InvalidState { .. })
    ));

    store.cancel(later.id, probe).await.unwrap();
    assert!(matches!(
        store.cancel(later.id, probe).await,
        Err(QueueError::InvalidState { .. })
    ));

    let missing = Uuid::new_v4();
    assert!(store.get(missing).await.unwrap().is_none());
    assert!(matches!(
        store.increment_attempts(missing, probe).await,
        Err(QueueError::NotFound(id)) if id == missing
    ));
    assert!(matches!(
        store.cancel(missing, probe).await,
        Err(QueueError::NotFound(_))
    ));

    // ========================================================================
    // Stats and retention
    // ========================================================================

    let stats = store.stats(Some(owner)).await.unwrap();
    assert_eq!(stats.sent, 1);
    assert_eq!(stats.scheduled, 1);
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.total, 3);

    assert!(matches!(
        store
            .purge_older_than(now + Duration::days(1), &[TaskStatus::Pending])
            .await,
        Err(QueueError::Validation(_))
    ));

    let removed = store
        .purge_older_than(now + Duration::days(1), &TaskStatus::RETENTION)
        .await
        .unwrap();
    assert!(removed >= 2);
    assert!(store.get(high.id).await.unwrap().is_none());
    assert!(store.get(later.id).await.unwrap().is_none());
    assert!(store.get(low.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_in_memory_store_contract() {
    let store = InMemoryQueueStore::new();
    exercise_contract(&store).await;
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_in_memory_claim_races() {
    use std::sync::Arc;

    let store = Arc::new(InMemoryQueueStore::new());
    let record = new_task(Uuid::new_v4(), "race").into_record(base()).unwrap();
    let id = record.id;
    store.enqueue(record).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move { store.claim(id, base()).await.unwrap() }));
    }
    let mut wins = 0;
    for handle in handles {
        if handle.await.unwrap() {
            wins += 1;
        }
    }
    assert_eq!(wins, 1);
}

#[cfg(feature = "postgres")]
#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a disposable Postgres database"]
async fn test_postgres_store_contract() {
    use outbound_queue::infra::PostgresQueueStore;

    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let store = PostgresQueueStore::connect(&url, 2).await.unwrap();
    store.migrate().await.unwrap();
    exercise_contract(&store).await;
}
