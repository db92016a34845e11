//! EventStore interface tests.
//!
//! These tests verify the contract of the EventStore trait. Stores may be
//! shared between tests, so every test works on fresh channels and ids
//! relative to the tail it observed first.

use std::collections::HashSet;
use std::time::Duration;

use futures::future::join_all;
use serde_json::json;
use uuid::Uuid;

use imbus::storage::EventStore;
use imbus::utils::ManualClock;
use imbus::{Channel, NamespacedChannel, NewEvent};

/// A channel no other test uses.
pub fn fresh_channel(prefix: &str) -> NamespacedChannel {
    Channel::tag(format!("{prefix}-{}", Uuid::new_v4())).namespaced("test")
}

pub fn make_event(channel: &NamespacedChannel, event_type: &str, n: i64) -> NewEvent {
    NewEvent::new(channel.clone(), event_type, json!({ "n": n }))
}

fn set(channels: &[&NamespacedChannel]) -> HashSet<NamespacedChannel> {
    channels.iter().map(|c| (*c).clone()).collect()
}

// =============================================================================
// EventStore::append tests
// =============================================================================

pub async fn test_append_assigns_increasing_ids<S: EventStore>(store: &S) {
    let ch = fresh_channel("append_ids");
    let tail = store.tail_id().await.expect("tail_id should succeed");

    let ids = store
        .append(vec![
            make_event(&ch, "a", 0),
            make_event(&ch, "b", 1),
            make_event(&ch, "c", 2),
        ])
        .await
        .expect("append should succeed");

    assert_eq!(ids.len(), 3);
    assert!(ids[0] > tail, "ids should be past the previous tail");
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids should increase");
    assert_eq!(store.tail_id().await.unwrap(), ids[2]);
}

pub async fn test_append_empty<S: EventStore>(store: &S) {
    let tail = store.tail_id().await.unwrap();

    let ids = store.append(vec![]).await.expect("empty append should succeed");

    assert!(ids.is_empty());
    assert_eq!(store.tail_id().await.unwrap(), tail);
}

pub async fn test_append_batches_are_ordered<S: EventStore>(store: &S) {
    let ch = fresh_channel("append_batches");

    let first = store.append(vec![make_event(&ch, "t1", 0)]).await.unwrap();
    let second = store
        .append(vec![make_event(&ch, "t2", 1), make_event(&ch, "t2", 2)])
        .await
        .unwrap();

    assert!(first[0] < second[0], "later commit should get larger ids");
}

pub async fn test_concurrent_appends_get_distinct_ids<S: EventStore>(store: &S) {
    let ch = fresh_channel("append_concurrent");

    let results = join_all((0..8).map(|i| store.append(vec![make_event(&ch, "c", i)]))).await;

    let ids: HashSet<_> = results
        .into_iter()
        .flat_map(|r| r.expect("append should succeed"))
        .collect();
    assert_eq!(ids.len(), 8);

    let events = store.poll(&set(&[&ch]), 0).await.unwrap();
    assert_eq!(events.len(), 8);
}

// =============================================================================
// EventStore::poll tests
// =============================================================================

pub async fn test_poll_filters_channel_and_cursor<S: EventStore>(store: &S) {
    let a = fresh_channel("poll_a");
    let b = fresh_channel("poll_b");
    let tail = store.tail_id().await.unwrap();
    let ids = store
        .append(vec![
            make_event(&a, "x", 1),
            make_event(&b, "y", 2),
            make_event(&a, "z", 3),
        ])
        .await
        .unwrap();

    let events = store.poll(&set(&[&a]), tail).await.unwrap();
    let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(types, vec!["x", "z"]);

    let events = store.poll(&set(&[&a]), ids[0]).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, ids[2]);

    let events = store.poll(&set(&[&a]), ids[2]).await.unwrap();
    assert!(events.is_empty(), "nothing past the last id");
}

pub async fn test_poll_unions_channels<S: EventStore>(store: &S) {
    let a = fresh_channel("union_a");
    let b = fresh_channel("union_b");
    let tail = store.tail_id().await.unwrap();
    let ids = store
        .append(vec![make_event(&a, "x", 1), make_event(&b, "y", 2)])
        .await
        .unwrap();

    let events = store.poll(&set(&[&a, &b]), tail).await.unwrap();

    let got: Vec<_> = events.iter().map(|e| e.id).collect();
    assert_eq!(got, ids);
}

pub async fn test_poll_empty_channel_set<S: EventStore>(store: &S) {
    let ch = fresh_channel("poll_empty");
    store.append(vec![make_event(&ch, "x", 1)]).await.unwrap();

    let events = store.poll(&HashSet::new(), 0).await.unwrap();

    assert!(events.is_empty());
}

pub async fn test_poll_unknown_channel<S: EventStore>(store: &S) {
    let events = store
        .poll(&set(&[&fresh_channel("unknown")]), 0)
        .await
        .unwrap();

    assert!(events.is_empty());
}

pub async fn test_poll_since_zero_returns_recent<S: EventStore>(store: &S) {
    let ch = fresh_channel("poll_recent");
    let ids = store
        .append(vec![make_event(&ch, "x", 1), make_event(&ch, "y", 2)])
        .await
        .unwrap();

    let events = store.poll(&set(&[&ch]), 0).await.unwrap();

    let got: Vec<_> = events.iter().map(|e| e.id).collect();
    assert_eq!(got, ids);
}

pub async fn test_poll_preserves_event_data<S: EventStore>(store: &S) {
    let ch = Channel::record_tag("res.partner", 7, format!("t-{}", Uuid::new_v4())).namespaced("test");
    let payload = json!({"text": "héllo", "list": [1, 2.5, null], "nested": {"ok": true}});
    store
        .append(vec![NewEvent::new(ch.clone(), "message", payload.clone())])
        .await
        .unwrap();

    let events = store.poll(&set(&[&ch]), 0).await.unwrap();

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].channel, ch);
    assert_eq!(events[0].event_type, "message");
    assert_eq!(events[0].payload, payload);
}

pub async fn test_poll_timestamps_follow_ids<S: EventStore>(store: &S) {
    let ch = fresh_channel("poll_ts");
    store.append(vec![make_event(&ch, "x", 1)]).await.unwrap();
    store.append(vec![make_event(&ch, "y", 2)]).await.unwrap();

    let events = store.poll(&set(&[&ch]), 0).await.unwrap();

    assert_eq!(events.len(), 2);
    assert!(events[0].created_at <= events[1].created_at);
}

// =============================================================================
// EventStore::vacuum tests
// =============================================================================

pub async fn test_vacuum_keeps_recent_events<S: EventStore>(store: &S) {
    let ch = fresh_channel("vacuum_recent");
    let tail_before = store.tail_id().await.unwrap();
    store.append(vec![make_event(&ch, "x", 1)]).await.unwrap();

    store.vacuum().await.expect("vacuum should succeed");

    let events = store.poll(&set(&[&ch]), tail_before).await.unwrap();
    assert_eq!(events.len(), 1);
}

/// Expires everything in the store, so it runs last.
pub async fn test_tail_id_survives_vacuum<S: EventStore>(store: &S, clock: &ManualClock) {
    let ch = fresh_channel("vacuum_tail");
    let ids = store.append(vec![make_event(&ch, "x", 1)]).await.unwrap();
    clock.advance(Duration::from_secs(24 * 60 * 60));

    store.vacuum().await.expect("vacuum should succeed");

    assert!(
        store.poll(&set(&[&ch]), ids[0] - 1).await.unwrap().is_empty(),
        "event should be vacuumed"
    );
    assert_eq!(
        store.tail_id().await.unwrap(),
        ids[0],
        "tail should not move back after vacuum"
    );
    let next = store.append(vec![make_event(&ch, "y", 2)]).await.unwrap();
    assert!(next[0] > ids[0]);
}

/// Run all EventStore tests against a store implementation reading time
/// from `$clock`.
#[macro_export]
macro_rules! run_event_store_tests {
    ($store:expr, $clock:expr) => {
        use $crate::storage::event_store_tests::*;

        // append tests
        test_append_assigns_increasing_ids($store).await;
        println!("  test_append_assigns_increasing_ids: PASSED");

        test_append_empty($store).await;
        println!("  test_append_empty: PASSED");

        test_append_batches_are_ordered($store).await;
        println!("  test_append_batches_are_ordered: PASSED");

        test_concurrent_appends_get_distinct_ids($store).await;
        println!("  test_concurrent_appends_get_distinct_ids: PASSED");

        // poll tests
        test_poll_filters_channel_and_cursor($store).await;
        println!("  test_poll_filters_channel_and_cursor: PASSED");

        test_poll_unions_channels($store).await;
        println!("  test_poll_unions_channels: PASSED");

        test_poll_empty_channel_set($store).await;
        println!("  test_poll_empty_channel_set: PASSED");

        test_poll_unknown_channel($store).await;
        println!("  test_poll_unknown_channel: PASSED");

        test_poll_since_zero_returns_recent($store).await;
        println!("  test_poll_since_zero_returns_recent: PASSED");

        test_poll_preserves_event_data($store).await;
        println!("  test_poll_preserves_event_data: PASSED");

        test_poll_timestamps_follow_ids($store).await;
        println!("  test_poll_timestamps_follow_ids: PASSED");

        // vacuum tests
        test_vacuum_keeps_recent_events($store).await;
        println!("  test_vacuum_keeps_recent_events: PASSED");

        test_tail_id_survives_vacuum($store, $clock).await;
        println!("  test_tail_id_survives_vacuum: PASSED");
    };
}
