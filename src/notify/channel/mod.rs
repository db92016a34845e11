//! In-process notifier for single-process deployments.
//!
//! Uses a tokio broadcast channel. Every listener sees every notification
//! emitted after it subscribed; topic filtering happens on the listener side.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::interfaces::notifier::{NotificationStream, Notifier, NotifyError, Result};

/// Default channel capacity for broadcast.
pub const DEFAULT_CAPACITY: usize = 1024;

/// In-memory notifier using a tokio broadcast channel.
#[derive(Clone)]
pub struct ChannelNotifier {
    sender: broadcast::Sender<(String, String)>,
}

impl ChannelNotifier {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Capacity bounds how far a listener may fall behind before it lags.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Number of open listen streams.
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChannelNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, topic: &str, payload: &str) -> Result<()> {
        // No receivers is fine: nobody is listening yet.
        match self.sender.send((topic.to_string(), payload.to_string())) {
            Ok(receivers) => debug!(topic, receivers, "Notification sent"),
            Err(_) => debug!(topic, "Notification sent (no listeners)"),
        }
        Ok(())
    }

    async fn listen(&self, topic: &str) -> Result<Box<dyn NotificationStream>> {
        Ok(Box::new(ChannelStream {
            topic: topic.to_string(),
            receiver: self.sender.subscribe(),
        }))
    }
}

struct ChannelStream {
    topic: String,
    receiver: broadcast::Receiver<(String, String)>,
}

#[async_trait]
impl NotificationStream for ChannelStream {
    async fn recv(&mut self) -> Result<String> {
        loop {
            match self.receiver.recv().await {
                Ok((topic, payload)) if topic == self.topic => return Ok(payload),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => return Err(NotifyError::Lagged(n)),
                Err(broadcast::error::RecvError::Closed) => return Err(NotifyError::Closed),
            }
        }
    }
}
