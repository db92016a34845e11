//! Transactional publisher.
//!
//! Producers stage events in a [`UnitOfWork`]. Committing appends the whole
//! batch atomically and only then emits the wakeup for the affected
//! channels, so a subscriber woken by it always finds the events. Dropping
//! a unit of work without committing discards it.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error};

use crate::channel::{Channel, NamespacedChannel};
use crate::config::BusConfig;
use crate::event::{EventId, NewEvent};
use crate::interfaces::event_store::{EventStore, StorageError};
use crate::interfaces::notifier::{Notifier, NotifyError};
use crate::notify::encode_wakeups;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("append failed: {0}")]
    Storage(#[from] StorageError),

    #[error("payload serialization failed: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("notify failed: {0}")]
    Notify(#[from] NotifyError),
}

pub type Result<T> = std::result::Result<T, PublishError>;

/// Producer surface of the bus.
#[derive(Clone)]
pub struct Publisher {
    store: Arc<dyn EventStore>,
    notifier: Arc<dyn Notifier>,
    database: String,
    topic: String,
    max_payload: usize,
}

impl Publisher {
    pub fn new(store: Arc<dyn EventStore>, notifier: Arc<dyn Notifier>, config: &BusConfig) -> Self {
        Self {
            store,
            notifier,
            database: config.database.clone(),
            topic: config.notification_topic.clone(),
            max_payload: config.notify_payload_max_bytes,
        }
    }

    /// Open a unit of work.
    pub fn begin(&self) -> UnitOfWork {
        UnitOfWork {
            publisher: self.clone(),
            staged: Vec::new(),
        }
    }

    /// Publish a single event in its own unit of work.
    pub async fn send_one<P: Serialize>(
        &self,
        channel: impl Into<Channel>,
        event_type: impl Into<String>,
        payload: P,
    ) -> Result<EventId> {
        let mut uow = self.begin();
        uow.publish(channel, event_type, payload)?;
        let ids = uow.commit().await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| StorageError::Unavailable("append returned no id".to_string()).into())
    }

    /// Publish several events in one unit of work.
    pub async fn send_many<I, C, T, P>(&self, items: I) -> Result<Vec<EventId>>
    where
        I: IntoIterator<Item = (C, T, P)>,
        C: Into<Channel>,
        T: Into<String>,
        P: Serialize,
    {
        let mut uow = self.begin();
        for (channel, event_type, payload) in items {
            uow.publish(channel, event_type, payload)?;
        }
        uow.commit().await
    }

    /// Emit the wakeup for events the caller appended in its own transaction.
    ///
    /// Call after that transaction has committed.
    pub async fn announce<I>(&self, channels: I) -> Result<()>
    where
        I: IntoIterator<Item = Channel>,
    {
        let channels: BTreeSet<NamespacedChannel> = channels
            .into_iter()
            .map(|c| c.namespaced(&self.database))
            .collect();
        self.emit(&channels).await?;
        Ok(())
    }

    async fn emit(&self, channels: &BTreeSet<NamespacedChannel>) -> std::result::Result<(), NotifyError> {
        for payload in encode_wakeups(channels, self.max_payload) {
            self.notifier.notify(&self.topic, &payload).await?;
        }
        debug!(topic = %self.topic, channels = channels.len(), "Wakeup emitted");
        Ok(())
    }
}

/// Events staged for one transaction.
pub struct UnitOfWork {
    publisher: Publisher,
    staged: Vec<NewEvent>,
}

impl UnitOfWork {
    /// Stage an event. The payload is serialized now so a bad payload fails
    /// the producer rather than the commit.
    pub fn publish<P: Serialize>(
        &mut self,
        channel: impl Into<Channel>,
        event_type: impl Into<String>,
        payload: P,
    ) -> Result<()> {
        let payload = serde_json::to_value(payload)?;
        let channel = channel.into().namespaced(&self.publisher.database);
        self.staged.push(NewEvent::new(channel, event_type, payload));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Append every staged event, then emit one wakeup for their channels.
    ///
    /// Returns the assigned ids in publish order. A failed append emits
    /// nothing. A failed notify is logged only: the events are already
    /// durable and subscribers pick them up on the next wakeup or resubscribe.
    pub async fn commit(self) -> Result<Vec<EventId>> {
        if self.staged.is_empty() {
            return Ok(Vec::new());
        }

        let channels: BTreeSet<NamespacedChannel> =
            self.staged.iter().map(|e| e.channel.clone()).collect();
        let ids = self.publisher.store.append(self.staged).await?;

        if let Err(e) = self.publisher.emit(&channels).await {
            error!(
                error = %e,
                channels = channels.len(),
                "Notify failed after commit, subscribers will catch up on next wakeup"
            );
        }
        Ok(ids)
    }

    /// Discard every staged event.
    pub fn rollback(self) {
        debug!(discarded = self.staged.len(), "Unit of work rolled back");
    }
}
