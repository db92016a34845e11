//! Wakeup listener.
//!
//! Holds one long-lived subscription to the notification topic and hands
//! each decoded channel list to a [`WakeupConsumer`], in arrival order. A
//! broken stream is retried after a pause of one horizon, and the consumer
//! is asked to resync once the stream is back since wakeups emitted in
//! between are lost. The stop signal is observed at every suspension point.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::channel::NamespacedChannel;
use crate::interfaces::notifier::{NotificationStream, Notifier, NotifyError};
use crate::notify::decode_wakeup;

/// Receiver of wakeups.
#[async_trait]
pub trait WakeupConsumer: Send + Sync {
    /// Channels that may have new events.
    async fn on_wakeup(&self, channels: Vec<NamespacedChannel>);

    /// Wakeups were lost; every subscriber should be checked.
    async fn on_resync(&self);
}

enum StreamEnd {
    Stopped,
    Broken,
}

pub struct WakeupListener {
    notifier: Arc<dyn Notifier>,
    topic: String,
    horizon: Duration,
}

impl WakeupListener {
    pub fn new(notifier: Arc<dyn Notifier>, topic: impl Into<String>, horizon: Duration) -> Self {
        Self {
            notifier,
            topic: topic.into(),
            horizon,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Open a stream on the topic. Wakeups emitted from now on are buffered
    /// in it until [`run_with`](Self::run_with) consumes them.
    pub async fn subscribe(&self) -> Result<Box<dyn NotificationStream>, NotifyError> {
        self.notifier.listen(&self.topic).await
    }

    /// Listen until `stop` is set (or its sender is dropped).
    pub async fn run(&self, consumer: &dyn WakeupConsumer, stop: watch::Receiver<bool>) {
        self.run_from(None, consumer, stop).await;
    }

    /// Like [`run`](Self::run), starting on a stream already opened with
    /// [`subscribe`](Self::subscribe).
    pub async fn run_with(
        &self,
        stream: Box<dyn NotificationStream>,
        consumer: &dyn WakeupConsumer,
        stop: watch::Receiver<bool>,
    ) {
        self.run_from(Some(stream), consumer, stop).await;
    }

    async fn run_from(
        &self,
        mut opened: Option<Box<dyn NotificationStream>>,
        consumer: &dyn WakeupConsumer,
        mut stop: watch::Receiver<bool>,
    ) {
        info!(topic = %self.topic, "Wakeup listener started");
        let mut reconnecting = false;

        while !*stop.borrow() {
            let listen = match opened.take() {
                Some(stream) => Ok(stream),
                None => tokio::select! {
                    result = self.notifier.listen(&self.topic) => result,
                    _ = stop_requested(&mut stop) => break,
                },
            };

            match listen {
                Ok(stream) => {
                    if reconnecting {
                        info!(topic = %self.topic, "Wakeup listener reconnected, resynchronising");
                        consumer.on_resync().await;
                    }
                    if let StreamEnd::Stopped = self.consume(stream, consumer, &mut stop).await {
                        break;
                    }
                }
                Err(e) => {
                    error!(topic = %self.topic, error = %e, "Failed to listen for wakeups");
                }
            }
            reconnecting = true;

            tokio::select! {
                _ = tokio::time::sleep(self.horizon) => {
                    debug!(topic = %self.topic, "Reconnecting wakeup listener");
                }
                _ = stop_requested(&mut stop) => break,
            }
        }

        info!(topic = %self.topic, "Wakeup listener stopped");
    }

    async fn consume(
        &self,
        mut stream: Box<dyn NotificationStream>,
        consumer: &dyn WakeupConsumer,
        stop: &mut watch::Receiver<bool>,
    ) -> StreamEnd {
        loop {
            let received = tokio::select! {
                received = stream.recv() => received,
                _ = stop_requested(stop) => return StreamEnd::Stopped,
            };

            match received {
                Ok(payload) => match decode_wakeup(&payload) {
                    Ok(channels) => consumer.on_wakeup(channels).await,
                    Err(e) => warn!(error = %e, payload = %payload, "Ignoring malformed wakeup"),
                },
                Err(NotifyError::Lagged(missed)) => {
                    warn!(missed, "Wakeups lost, resynchronising");
                    consumer.on_resync().await;
                }
                Err(e) => {
                    error!(topic = %self.topic, error = %e, "Wakeup stream disrupted");
                    return StreamEnd::Broken;
                }
            }
        }
    }
}

/// Resolves once the flag is set or the sender is gone.
pub(crate) async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}
