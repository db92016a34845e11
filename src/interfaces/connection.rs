//! Connection adapter interface.
//!
//! The minimal capability set the bus needs from a client transport. The
//! registry holds connections weakly; the transport owns the strong
//! reference for as long as it is alive.

use async_trait::async_trait;
use uuid::Uuid;

use crate::event::Event;

/// Stable identity of a connection.
pub type ConnectionId = Uuid;

/// Errors from pushing a batch through a connection.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The connection is closed or closing. Recoverable: the dispatcher
    /// drops the batch without advancing the cursor.
    #[error("connection is not in a sendable state")]
    InvalidState,

    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Connection: Send + Sync {
    /// Identity used to key the subscription registry.
    fn id(&self) -> ConnectionId;

    /// Session bound to the connection at handshake time.
    fn session_id(&self) -> &str;

    /// Serialize and transmit a batch of events, in order.
    async fn send(&self, events: &[Event]) -> Result<(), SendError>;

    /// Initiate close with `code`. Idempotent.
    async fn disconnect(&self, code: u16);
}
