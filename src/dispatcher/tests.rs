use super::*;
use crate::channel::Channel;
use crate::event::NewEvent;
use crate::interfaces::session::SessionInfo;
use crate::session::InMemorySessions;
use crate::storage::MemoryEventStore;
use crate::test_utils::RecordingConnection;
use serde_json::json;
use std::time::Duration;

const DB: &str = "db";
const CLOSE: u16 = 4001;

struct Fixture {
    registry: Arc<SubscriptionRegistry>,
    store: Arc<MemoryEventStore>,
    sessions: Arc<InMemorySessions>,
    dispatcher: Dispatcher,
}

async fn fixture() -> Fixture {
    let registry = Arc::new(SubscriptionRegistry::new(DB));
    let store = Arc::new(MemoryEventStore::new(Duration::from_secs(50)));
    let sessions = Arc::new(InMemorySessions::new());
    sessions.insert("s1", SessionInfo::new("alice")).await;
    sessions.insert("s2", SessionInfo::new("bob")).await;
    let dispatcher = Dispatcher::new(
        registry.clone(),
        store.clone(),
        sessions.clone(),
        CLOSE,
    );
    Fixture {
        registry,
        store,
        sessions,
        dispatcher,
    }
}

fn ch(tag: &str) -> NamespacedChannel {
    Channel::tag(tag).namespaced(DB)
}

async fn publish(store: &MemoryEventStore, tag: &str, n: i64) {
    let events = (0..n)
        .map(|i| NewEvent::new(ch(tag), "x", json!(i)))
        .collect();
    store.append(events).await.unwrap();
}

async fn subscribe(
    f: &Fixture,
    conn: &Arc<RecordingConnection>,
    tags: &[&str],
    since: EventId,
) -> Arc<dyn Connection> {
    let dyn_conn = conn.as_dyn();
    f.registry
        .set_subscription(
            &dyn_conn,
            tags.iter().map(|t| Channel::tag(*t)),
            Some(since),
            conn.session_id().to_string(),
            0,
        )
        .await;
    dyn_conn
}

#[tokio::test]
async fn test_delivers_pending_and_advances_cursor() {
    let f = fixture().await;
    let conn = RecordingConnection::new("s1");
    let c = subscribe(&f, &conn, &["a"], 0).await;
    publish(&f.store, "a", 2).await;
    publish(&f.store, "b", 1).await;

    let delivery = f.dispatcher.deliver(&c).await.unwrap();

    assert_eq!(delivery, Delivery::Sent { count: 2, last_id: 2 });
    assert_eq!(conn.delivered_ids().await, vec![1, 2]);
    assert_eq!(
        f.registry.subscription_of(c.id()).await.unwrap().last_delivered_id,
        2
    );
}

#[tokio::test]
async fn test_nothing_past_cursor_sends_nothing() {
    let f = fixture().await;
    publish(&f.store, "a", 3).await;
    let conn = RecordingConnection::new("s1");
    let c = subscribe(&f, &conn, &["a"], 3).await;

    assert_eq!(f.dispatcher.deliver(&c).await.unwrap(), Delivery::Empty);
    assert_eq!(conn.send_attempts().await, 0);
}

#[tokio::test]
async fn test_unsubscribed_connection_is_forgotten() {
    let f = fixture().await;
    let conn = RecordingConnection::new("s1");
    publish(&f.store, "a", 1).await;

    assert_eq!(
        f.dispatcher.deliver(&conn.as_dyn()).await.unwrap(),
        Delivery::Forgotten
    );
    assert_eq!(conn.send_attempts().await, 0);
}

#[tokio::test]
async fn test_invalid_session_disconnects_and_forgets() {
    let f = fixture().await;
    let conn = RecordingConnection::new("s1");
    let c = subscribe(&f, &conn, &["a"], 0).await;
    publish(&f.store, "a", 1).await;
    f.sessions.revoke("s1").await;

    let delivery = f.dispatcher.deliver(&c).await.unwrap();

    assert_eq!(delivery, Delivery::SessionInvalid(SessionInvalid::Revoked));
    assert_eq!(conn.disconnects().await, vec![CLOSE]);
    assert!(conn.batches().await.is_empty());
    assert!(f.registry.subscription_of(c.id()).await.is_none());
}

#[tokio::test]
async fn test_invalid_state_drops_batch_and_keeps_cursor() {
    let f = fixture().await;
    let conn = RecordingConnection::new("s1");
    let c = subscribe(&f, &conn, &["a"], 0).await;
    publish(&f.store, "a", 2).await;
    conn.fail_next_send(SendError::InvalidState).await;

    assert_eq!(f.dispatcher.deliver(&c).await.unwrap(), Delivery::Dropped);
    assert_eq!(
        f.registry.subscription_of(c.id()).await.unwrap().last_delivered_id,
        0
    );

    // Same batch again on the next attempt.
    assert_eq!(
        f.dispatcher.deliver(&c).await.unwrap(),
        Delivery::Sent { count: 2, last_id: 2 }
    );
    assert_eq!(conn.delivered_ids().await, vec![1, 2]);
}

#[tokio::test]
async fn test_transport_error_surfaces() {
    let f = fixture().await;
    let conn = RecordingConnection::new("s1");
    let c = subscribe(&f, &conn, &["a"], 0).await;
    publish(&f.store, "a", 1).await;
    conn.fail_next_send(SendError::Transport("reset".into())).await;

    let err = f.dispatcher.deliver(&c).await.unwrap_err();

    assert!(matches!(err, DispatchError::Send(SendError::Transport(_))));
    assert_eq!(
        f.registry.subscription_of(c.id()).await.unwrap().last_delivered_id,
        0
    );
}

#[tokio::test]
async fn test_poll_failure_keeps_cursor() {
    let f = fixture().await;
    let conn = RecordingConnection::new("s1");
    let c = subscribe(&f, &conn, &["a"], 0).await;
    publish(&f.store, "a", 1).await;
    f.store.set_fail_on_poll(true).await;

    let err = f.dispatcher.deliver(&c).await.unwrap_err();
    assert!(matches!(err, DispatchError::Storage(_)));
    assert_eq!(conn.send_attempts().await, 0);

    f.store.set_fail_on_poll(false).await;
    assert_eq!(
        f.dispatcher.deliver(&c).await.unwrap(),
        Delivery::Sent { count: 1, last_id: 1 }
    );
}

#[tokio::test]
async fn test_dispatch_fans_out_to_subscribers_only() {
    let f = fixture().await;
    let c1 = RecordingConnection::new("s1");
    let c2 = RecordingConnection::new("s2");
    let c3 = RecordingConnection::new("s1");
    let _d1 = subscribe(&f, &c1, &["a"], 0).await;
    let _d2 = subscribe(&f, &c2, &["a", "b"], 0).await;
    let _d3 = subscribe(&f, &c3, &["c"], 0).await;
    publish(&f.store, "a", 1).await;

    let summary = f.dispatcher.dispatch(&[ch("a")]).await;

    assert_eq!(summary.connections, 2);
    assert_eq!(summary.events_sent, 2);
    assert_eq!(c1.delivered_ids().await, vec![1]);
    assert_eq!(c2.delivered_ids().await, vec![1]);
    assert_eq!(c3.send_attempts().await, 0);
}

#[tokio::test]
async fn test_dispatch_counts_failures_per_connection() {
    let f = fixture().await;
    let ok = RecordingConnection::new("s1");
    let bad = RecordingConnection::new("s2");
    let _d1 = subscribe(&f, &ok, &["a"], 0).await;
    let _d2 = subscribe(&f, &bad, &["a"], 0).await;
    publish(&f.store, "a", 1).await;
    bad.fail_next_send(SendError::Transport("boom".into())).await;

    let summary = f.dispatcher.dispatch(&[ch("a")]).await;

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.events_sent, 1);
    assert_eq!(ok.delivered_ids().await, vec![1]);
}

#[tokio::test]
async fn test_resync_reaches_every_connection() {
    let f = fixture().await;
    let c1 = RecordingConnection::new("s1");
    let c2 = RecordingConnection::new("s2");
    let _d1 = subscribe(&f, &c1, &["a"], 0).await;
    let _d2 = subscribe(&f, &c2, &["b"], 0).await;
    publish(&f.store, "a", 1).await;
    publish(&f.store, "b", 1).await;

    let summary = f.dispatcher.resync().await;

    assert_eq!(summary.connections, 2);
    assert_eq!(c1.delivered_ids().await, vec![1]);
    assert_eq!(c2.delivered_ids().await, vec![2]);
}

#[tokio::test]
async fn test_concurrent_deliveries_are_serialized_per_connection() {
    let f = fixture().await;
    let conn = RecordingConnection::new("s1");
    conn.set_send_delay(Duration::from_millis(20)).await;
    let c = subscribe(&f, &conn, &["a"], 0).await;
    publish(&f.store, "a", 5).await;

    let dispatcher = Arc::new(f.dispatcher);
    let mut handles = Vec::new();
    for _ in 0..4 {
        let dispatcher = dispatcher.clone();
        let c = c.clone();
        handles.push(tokio::spawn(async move { dispatcher.deliver(&c).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(conn.max_in_flight().await, 1);
    assert_eq!(conn.delivered_ids().await, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_wakeup_consumer_delivers() {
    let f = fixture().await;
    let conn = RecordingConnection::new("s1");
    let _c = subscribe(&f, &conn, &["a"], 0).await;
    publish(&f.store, "a", 1).await;

    f.dispatcher.on_wakeup(vec![ch("a")]).await;

    assert_eq!(conn.delivered_ids().await, vec![1]);
}
