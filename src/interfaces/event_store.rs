//! Event storage interface.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::channel::NamespacedChannel;
use crate::event::{Event, EventId, NewEvent};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[cfg(any(feature = "sqlite", feature = "postgres"))]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Interface for the durable event tail.
///
/// Ids are assigned by the store and strictly increase with creation order
/// within a process. `append` and `poll` are safe to run concurrently;
/// `vacuum` is safe concurrently with both.
///
/// Implementations:
/// - `MemoryEventStore`: in-process, for single-process deployments and tests
/// - `SqliteEventStore`: SQLite storage
/// - `PostgresEventStore`: PostgreSQL storage
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append a batch atomically. Returns the assigned ids in input order.
    async fn append(&self, events: Vec<NewEvent>) -> Result<Vec<EventId>>;

    /// Events on any of `channels` with id greater than `since_id`, ascending.
    ///
    /// `since_id == 0` returns only events created within the last horizon.
    async fn poll(
        &self,
        channels: &HashSet<NamespacedChannel>,
        since_id: EventId,
    ) -> Result<Vec<Event>>;

    /// Current maximum event id, `0` when the log is empty.
    async fn tail_id(&self) -> Result<EventId>;

    /// Delete events older than twice the horizon. Returns the number removed.
    async fn vacuum(&self) -> Result<u64>;
}
