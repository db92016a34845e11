//! Test utilities and mock implementations.
//!
//! Mock connections and helpers for exercising the bus without a real
//! transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::channel::{Channel, NamespacedChannel};
use crate::event::{Event, EventId, NewEvent};
use crate::interfaces::connection::{Connection, ConnectionId, SendError};

#[derive(Default)]
struct RecordingState {
    batches: Vec<Vec<Event>>,
    disconnects: Vec<u16>,
    send_attempts: usize,
    fail_next_send: Option<SendError>,
    closed: bool,
    send_delay: Option<Duration>,
    in_flight: usize,
    max_in_flight: usize,
}

/// Connection that records every batch pushed to it.
pub struct RecordingConnection {
    id: ConnectionId,
    session_id: String,
    state: RwLock<RecordingState>,
}

impl RecordingConnection {
    pub fn new(session_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            state: RwLock::new(RecordingState::default()),
        })
    }

    /// The same connection behind the trait object the registry stores.
    pub fn as_dyn(self: &Arc<Self>) -> Arc<dyn Connection> {
        Arc::clone(self) as Arc<dyn Connection>
    }

    /// Make the next `send` fail with `error` without recording the batch.
    pub async fn fail_next_send(&self, error: SendError) {
        self.state.write().await.fail_next_send = Some(error);
    }

    /// Sleep this long inside every `send`.
    pub async fn set_send_delay(&self, delay: Duration) {
        self.state.write().await.send_delay = Some(delay);
    }

    /// Mark the transport closed; later sends fail with `InvalidState`.
    pub async fn close(&self) {
        self.state.write().await.closed = true;
    }

    pub async fn is_closed(&self) -> bool {
        self.state.read().await.closed
    }

    pub async fn batches(&self) -> Vec<Vec<Event>> {
        self.state.read().await.batches.clone()
    }

    /// Ids of every delivered event, in delivery order.
    pub async fn delivered_ids(&self) -> Vec<EventId> {
        self.state
            .read()
            .await
            .batches
            .iter()
            .flatten()
            .map(|e| e.id)
            .collect()
    }

    pub async fn delivered_count(&self) -> usize {
        self.state.read().await.batches.iter().map(Vec::len).sum()
    }

    pub async fn disconnects(&self) -> Vec<u16> {
        self.state.read().await.disconnects.clone()
    }

    pub async fn send_attempts(&self) -> usize {
        self.state.read().await.send_attempts
    }

    /// Highest number of `send` calls observed running at once.
    pub async fn max_in_flight(&self) -> usize {
        self.state.read().await.max_in_flight
    }
}

#[async_trait]
impl Connection for RecordingConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn send(&self, events: &[Event]) -> Result<(), SendError> {
        let delay = {
            let mut state = self.state.write().await;
            state.send_attempts += 1;
            if state.closed {
                return Err(SendError::InvalidState);
            }
            if let Some(err) = state.fail_next_send.take() {
                return Err(err);
            }
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.send_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().await;
        state.in_flight -= 1;
        state.batches.push(events.to_vec());
        Ok(())
    }

    async fn disconnect(&self, code: u16) {
        let mut state = self.state.write().await;
        state.disconnects.push(code);
        state.closed = true;
    }
}

/// Build a namespaced tag channel.
pub fn tag(database: &str, tag: &str) -> NamespacedChannel {
    Channel::tag(tag).namespaced(database)
}

/// Build a staged event on a tag channel.
pub fn new_event(database: &str, channel: &str, event_type: &str, payload: Value) -> NewEvent {
    NewEvent::new(tag(database, channel), event_type, payload)
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
