//! In-process event store.
//!
//! Backs single-process deployments (paired with the channel notifier) and
//! every in-process test. One lock guards both the id counter and the log,
//! so ids strictly increase in commit order.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::channel::NamespacedChannel;
use crate::event::{Event, EventId, NewEvent};
use crate::interfaces::event_store::{EventStore, Result, StorageError};
use crate::storage::helpers::cutoff;
use crate::utils::clock::{Clock, SystemClock};

#[derive(Default)]
struct MemoryLog {
    /// Ascending by id.
    events: Vec<Event>,
    last_id: EventId,
}

/// In-memory event store.
pub struct MemoryEventStore {
    log: RwLock<MemoryLog>,
    horizon: Duration,
    clock: Arc<dyn Clock>,
    fail_on_append: RwLock<bool>,
    fail_on_poll: RwLock<bool>,
}

impl MemoryEventStore {
    /// Create a store with the given replay horizon.
    pub fn new(horizon: Duration) -> Self {
        Self {
            log: RwLock::new(MemoryLog::default()),
            horizon,
            clock: Arc::new(SystemClock),
            fail_on_append: RwLock::new(false),
            fail_on_poll: RwLock::new(false),
        }
    }

    /// Read time from `clock` instead of the wall clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn set_fail_on_append(&self, fail: bool) {
        *self.fail_on_append.write().await = fail;
    }

    pub async fn set_fail_on_poll(&self, fail: bool) {
        *self.fail_on_poll.write().await = fail;
    }

    /// Number of events currently retained.
    pub async fn len(&self) -> usize {
        self.log.read().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, events: Vec<NewEvent>) -> Result<Vec<EventId>> {
        if *self.fail_on_append.read().await {
            return Err(StorageError::Unavailable("append disabled".to_string()));
        }
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let created_at = self.clock.now();
        let mut log = self.log.write().await;
        let mut ids = Vec::with_capacity(events.len());
        for event in events {
            log.last_id += 1;
            let id = log.last_id;
            log.events.push(Event::from_new(id, event, created_at));
            ids.push(id);
        }
        Ok(ids)
    }

    async fn poll(
        &self,
        channels: &HashSet<NamespacedChannel>,
        since_id: EventId,
    ) -> Result<Vec<Event>> {
        if *self.fail_on_poll.read().await {
            return Err(StorageError::Unavailable("poll disabled".to_string()));
        }
        if channels.is_empty() {
            return Ok(Vec::new());
        }

        let log = self.log.read().await;
        let events = if since_id == 0 {
            let window_start = cutoff(self.clock.now(), self.horizon);
            log.events
                .iter()
                .filter(|e| e.created_at > window_start && channels.contains(&e.channel))
                .cloned()
                .collect()
        } else {
            let start = log.events.partition_point(|e| e.id <= since_id);
            log.events[start..]
                .iter()
                .filter(|e| channels.contains(&e.channel))
                .cloned()
                .collect()
        };
        Ok(events)
    }

    async fn tail_id(&self) -> Result<EventId> {
        Ok(self.log.read().await.last_id)
    }

    async fn vacuum(&self) -> Result<u64> {
        let threshold = cutoff(self.clock.now(), self.horizon * 2);
        let mut log = self.log.write().await;
        let before = log.events.len();
        log.events.retain(|e| e.created_at >= threshold);
        Ok((before - log.events.len()) as u64)
    }
}
