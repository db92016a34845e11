//! Channel-backed connection adapter.
//!
//! [`ChannelConnection`] implements [`Connection`] over a bounded mpsc
//! channel of [`Frame`]s. A websocket layer owns the connection (strong
//! reference), drains the receiver and writes each frame to the socket.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::event::{notifications_json, Event};
use crate::interfaces::connection::{Connection, ConnectionId, SendError};

/// Default number of frames buffered per connection.
pub const DEFAULT_FRAME_BUFFER: usize = 64;

/// A frame for the transport to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A JSON array of notifications.
    Notifications(String),
    /// Close the socket with this code.
    Close(u16),
}

pub struct ChannelConnection {
    id: ConnectionId,
    session_id: String,
    frames: mpsc::Sender<Frame>,
    closed: AtomicBool,
}

impl ChannelConnection {
    /// Create a connection and the receiver its transport drains.
    pub fn new(session_id: impl Into<String>) -> (Self, mpsc::Receiver<Frame>) {
        Self::with_capacity(session_id, DEFAULT_FRAME_BUFFER)
    }

    pub fn with_capacity(
        session_id: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Frame>) {
        let (frames, rx) = mpsc::channel(capacity.max(1));
        let connection = Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            frames,
            closed: AtomicBool::new(false),
        };
        (connection, rx)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.frames.is_closed()
    }
}

#[async_trait]
impl Connection for ChannelConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn send(&self, events: &[Event]) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::InvalidState);
        }
        let body = notifications_json(events).map_err(|e| SendError::Transport(e.to_string()))?;
        self.frames
            .send(Frame::Notifications(body))
            .await
            .map_err(|_| SendError::InvalidState)
    }

    async fn disconnect(&self, code: u16) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.frames.send(Frame::Close(code)).await.is_err() {
            debug!(connection = %self.id, "Transport gone before close frame");
        }
    }
}
