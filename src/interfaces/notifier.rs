//! Asynchronous notification primitive.
//!
//! The bus only needs `notify(topic, payload)` and `listen(topic)`; payloads
//! are opaque strings of at least a few kilobytes.

use async_trait::async_trait;

/// Result type for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;

/// Errors raised by a notification backend.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Notification stream closed")]
    Closed,

    #[error("Listener lagged, {0} notifications dropped")]
    Lagged(u64),

    #[error("Invalid notify function name: {0}")]
    InvalidFunctionName(String),

    #[cfg(any(feature = "sqlite", feature = "postgres"))]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Emit and subscribe to notifications on a named topic.
///
/// Implementations:
/// - `ChannelNotifier`: tokio broadcast channel, single process
/// - `PgNotifier`: PostgreSQL `NOTIFY` / `LISTEN`
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Emit `payload` on `topic`.
    async fn notify(&self, topic: &str, payload: &str) -> Result<()>;

    /// Open a stream of payloads emitted on `topic` from now on.
    async fn listen(&self, topic: &str) -> Result<Box<dyn NotificationStream>>;
}

/// A live subscription to a topic.
#[async_trait]
pub trait NotificationStream: Send {
    /// Wait for the next payload. Must be cancel-safe: the listener races it
    /// against its stop signal.
    async fn recv(&mut self) -> Result<String>;
}
