//! Shared utilities for integration tests.
//!
//! A started bus over the in-process store and notifier, with a manual
//! clock and an in-memory session table.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use imbus::interfaces::{Connection, SessionInfo};
use imbus::notify::ChannelNotifier;
use imbus::session::InMemorySessions;
use imbus::storage::MemoryEventStore;
use imbus::test_utils::{eventually, RecordingConnection};
use imbus::utils::ManualClock;
use imbus::{Bus, BusConfig};

/// How long to wait for asynchronous delivery before failing.
pub const WAIT: Duration = Duration::from_secs(2);

pub const DATABASE: &str = "testdb";
pub const SESSION_EXPIRED: u16 = 4001;

pub struct Harness {
    pub bus: Bus,
    pub notifier: ChannelNotifier,
    pub store: Arc<MemoryEventStore>,
    pub sessions: Arc<InMemorySessions>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    /// Build and start a bus.
    pub async fn started() -> Self {
        imbus::utils::bootstrap::try_init_tracing();

        let config = BusConfig {
            database: DATABASE.to_string(),
            close_code_session_expired: SESSION_EXPIRED,
            ..Default::default()
        };
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(MemoryEventStore::new(config.horizon()).with_clock(clock.clone()));
        let notifier = ChannelNotifier::new();
        let sessions = Arc::new(InMemorySessions::new().with_clock(clock.clone()));

        let bus = Bus::new(
            config,
            store.clone(),
            Arc::new(notifier.clone()),
            sessions.clone(),
        );
        bus.start().await.expect("bus should start");

        Self {
            bus,
            notifier,
            store,
            sessions,
            clock,
        }
    }

    /// A connection with a fresh valid session.
    pub async fn connect(&self, session_id: &str) -> (Arc<RecordingConnection>, Arc<dyn Connection>) {
        self.sessions
            .insert(session_id, SessionInfo::new(format!("user-{session_id}")))
            .await;
        let conn = RecordingConnection::new(session_id);
        let handle = conn.as_dyn();
        (conn, handle)
    }

    pub async fn cursor_of(&self, connection: &Arc<dyn Connection>) -> Option<i64> {
        self.bus
            .registry()
            .subscription_of(connection.id())
            .await
            .map(|s| s.last_delivered_id)
    }

    pub async fn shutdown(self) {
        self.bus.stop().await;
    }
}

/// Wait until `conn` has received at least `count` events.
pub async fn wait_for_events(conn: &Arc<RecordingConnection>, count: usize) {
    let c = conn.clone();
    assert!(
        eventually(WAIT, move || {
            let c = c.clone();
            async move { c.delivered_count().await >= count }
        })
        .await,
        "expected {count} events, got {:?}",
        conn.delivered_ids().await
    );
}

/// Wait until `check` holds.
pub async fn wait_until<F, Fut>(check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    assert!(eventually(WAIT, check).await, "condition not reached in time");
}
