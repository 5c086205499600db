//! Tests for utility types

use chrono::Duration;
use outbound_queue::util::{Clock, ManualClock, Priority};

#[test]
fn test_priority_ordering() {
    assert!(Priority::Critical > Priority::High);
    assert!(Priority::High > Priority::Normal);
    assert!(Priority::Normal > Priority::Low);
    assert!(Priority::Critical.as_i32() > Priority::High.as_i32());
}

#[test]
fn test_priority_default_and_conversion() {
    assert_eq!(Priority::default(), Priority::Normal);
    let raw: i32 = Priority::High.into();
    assert_eq!(raw, 10);
}

#[test]
fn test_priority_serde() {
    let json = serde_json::to_string(&Priority::Critical).unwrap();
    assert_eq!(json, "\"critical\"");
}

#[test]
fn test_manual_clock() {
    let clock = ManualClock::default();
    let start = clock.now();
    clock.advance(Duration::seconds(90));
    assert_eq!(clock.now() - start, Duration::seconds(90));
}
