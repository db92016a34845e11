//! Dispatcher.
//!
//! Runs the delivery routine for connections: look up the subscription,
//! validate its session, poll the store past the cursor, push the batch and
//! advance the cursor. Deliveries to one connection are serialized by the
//! registry's per-connection lock; deliveries to different connections run
//! concurrently.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::channel::NamespacedChannel;
use crate::event::EventId;
use crate::interfaces::connection::{Connection, SendError};
use crate::interfaces::event_store::{EventStore, StorageError};
use crate::interfaces::session::{SessionInvalid, SessionValidator};
use crate::listener::WakeupConsumer;
use crate::registry::SubscriptionRegistry;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("poll failed: {0}")]
    Storage(#[from] StorageError),

    #[error("send failed: {0}")]
    Send(#[from] SendError),
}

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Outcome of one delivery routine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The connection has no subscription.
    Forgotten,
    /// The session was rejected; the connection was disconnected and forgotten.
    SessionInvalid(SessionInvalid),
    /// Nothing past the cursor.
    Empty,
    /// A batch was pushed and the cursor advanced to `last_id`.
    Sent { count: usize, last_id: EventId },
    /// The connection was not sendable; the cursor is unchanged.
    Dropped,
}

/// Aggregate of a fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    pub connections: usize,
    pub events_sent: usize,
    pub disconnected: usize,
    pub failed: usize,
}

pub struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
    store: Arc<dyn EventStore>,
    sessions: Arc<dyn SessionValidator>,
    close_code: u16,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        store: Arc<dyn EventStore>,
        sessions: Arc<dyn SessionValidator>,
        close_code: u16,
    ) -> Self {
        Self {
            registry,
            store,
            sessions,
            close_code,
        }
    }

    /// Run the delivery routine for one connection.
    pub async fn deliver(&self, connection: &Arc<dyn Connection>) -> Result<Delivery> {
        let id = connection.id();
        let Some(lock) = self.registry.delivery_lock(id).await else {
            return Ok(Delivery::Forgotten);
        };
        let _guard = lock.lock().await;

        // Re-read under the delivery lock: a forget or resubscribe may have
        // landed while this delivery was waiting.
        let Some(subscription) = self.registry.subscription_of(id).await else {
            return Ok(Delivery::Forgotten);
        };

        if let Err(reason) = self.sessions.validate(&subscription.session_id).await {
            info!(connection = %id, %reason, "Session invalid, disconnecting");
            connection.disconnect(self.close_code).await;
            self.registry.forget(id).await;
            return Ok(Delivery::SessionInvalid(reason));
        }

        if subscription.channels.is_empty() {
            return Ok(Delivery::Empty);
        }

        let events = self
            .store
            .poll(&subscription.channels, subscription.last_delivered_id)
            .await?;
        let Some(last_id) = events.last().map(|e| e.id) else {
            return Ok(Delivery::Empty);
        };

        match connection.send(&events).await {
            Ok(()) => {
                self.registry.advance_cursor(id, last_id).await;
                debug!(connection = %id, count = events.len(), last_id, "Delivered");
                Ok(Delivery::Sent {
                    count: events.len(),
                    last_id,
                })
            }
            Err(SendError::InvalidState) => {
                debug!(connection = %id, "Connection not sendable, batch dropped");
                Ok(Delivery::Dropped)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Deliver to every connection subscribed to any of `channels`.
    pub async fn dispatch(&self, channels: &[NamespacedChannel]) -> DispatchSummary {
        let connections = self.registry.connections_for(channels).await;
        self.deliver_all(connections).await
    }

    /// Deliver to every registered connection.
    pub async fn resync(&self) -> DispatchSummary {
        let connections = self.registry.connections().await;
        info!(connections = connections.len(), "Resynchronising all connections");
        self.deliver_all(connections).await
    }

    async fn deliver_all(&self, connections: Vec<Arc<dyn Connection>>) -> DispatchSummary {
        let results = join_all(connections.iter().map(|c| self.deliver(c))).await;

        let mut summary = DispatchSummary {
            connections: connections.len(),
            ..Default::default()
        };
        for (connection, result) in connections.iter().zip(results) {
            match result {
                Ok(Delivery::Sent { count, .. }) => summary.events_sent += count,
                Ok(Delivery::SessionInvalid(_)) => summary.disconnected += 1,
                Ok(_) => {}
                Err(e) => {
                    summary.failed += 1;
                    warn!(connection = %connection.id(), error = %e, "Delivery failed");
                }
            }
        }
        summary
    }
}

#[async_trait]
impl WakeupConsumer for Dispatcher {
    async fn on_wakeup(&self, channels: Vec<NamespacedChannel>) {
        let summary = self.dispatch(&channels).await;
        debug!(
            channels = channels.len(),
            connections = summary.connections,
            events = summary.events_sent,
            "Wakeup handled"
        );
    }

    async fn on_resync(&self) {
        self.resync().await;
    }
}

#[cfg(test)]
mod tests;
