//! The bus.
//!
//! [`Bus`] owns one instance of every component: the event store and
//! notifier, the subscription registry, the dispatcher and the publisher.
//! It is constructed once by the embedding application and passed to the
//! producer and connection layers. Background work (the wakeup listener
//! and the maintenance loop) runs between [`Bus::start`] and [`Bus::stop`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{Channel, NamespacedChannel};
use crate::config::{BusConfig, Config};
use crate::dispatcher::{Delivery, DispatchError, DispatchSummary, Dispatcher};
use crate::event::EventId;
use crate::interfaces::connection::Connection;
use crate::interfaces::event_store::{EventStore, StorageError};
use crate::interfaces::notifier::{Notifier, NotifyError};
use crate::interfaces::session::SessionValidator;
use crate::listener::{stop_requested, WakeupListener};
use crate::publisher::Publisher;
use crate::registry::SubscriptionRegistry;
use crate::storage::init_backend;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("backend initialization failed: {0}")]
    Backend(Box<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("wakeup subscription failed: {0}")]
    Notify(#[from] NotifyError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

pub type Result<T> = std::result::Result<T, BusError>;

struct Running {
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct Bus {
    config: BusConfig,
    store: Arc<dyn EventStore>,
    notifier: Arc<dyn Notifier>,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Arc<Dispatcher>,
    publisher: Publisher,
    running: Mutex<Option<Running>>,
}

impl Bus {
    pub fn new(
        config: BusConfig,
        store: Arc<dyn EventStore>,
        notifier: Arc<dyn Notifier>,
        sessions: Arc<dyn SessionValidator>,
    ) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new(config.database.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            store.clone(),
            sessions,
            config.close_code_session_expired,
        ));
        let publisher = Publisher::new(store.clone(), notifier.clone(), &config);

        Self {
            config,
            store,
            notifier,
            registry,
            dispatcher,
            publisher,
            running: Mutex::new(None),
        }
    }

    /// Build the backend named by `config.storage` and a bus on top of it.
    pub async fn from_config(config: &Config, sessions: Arc<dyn SessionValidator>) -> Result<Self> {
        let backend = init_backend(config).await.map_err(BusError::Backend)?;
        Ok(Self::new(
            config.bus.clone(),
            backend.store,
            backend.notifier,
            sessions,
        ))
    }

    /// Spawn the wakeup listener and the maintenance loop. No-op if already
    /// running.
    ///
    /// The wakeup stream is open when this returns, so anything committed
    /// afterwards is delivered. Fails if the stream cannot be opened.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("Bus already running");
            return Ok(());
        }

        let listener = WakeupListener::new(
            self.notifier.clone(),
            self.config.notification_topic.clone(),
            self.config.horizon(),
        );
        let stream = listener.subscribe().await?;

        let (stop_tx, stop_rx) = watch::channel(false);

        let dispatcher = self.dispatcher.clone();
        let listener_stop = stop_rx.clone();
        let listener_task = tokio::spawn(async move {
            listener
                .run_with(stream, dispatcher.as_ref(), listener_stop)
                .await;
        });

        let maintenance_task = tokio::spawn(maintenance_loop(
            self.store.clone(),
            self.registry.clone(),
            self.config.vacuum_interval(),
            stop_rx,
        ));

        *running = Some(Running {
            stop: stop_tx,
            tasks: vec![listener_task, maintenance_task],
        });

        info!(
            database = %self.config.database,
            topic = %self.config.notification_topic,
            "Bus started"
        );
        Ok(())
    }

    /// Signal the background tasks and wait for them to finish. No-op if
    /// not running.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        let _ = running.stop.send(true);
        for task in running.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Bus task ended abnormally");
            }
        }
        info!("Bus stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Producer surface.
    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Register or replace the connection's subscription, then flush
    /// anything already past its cursor.
    ///
    /// `last_seen_id` of `None` starts a fresh subscription at the current
    /// tail and keeps the cursor of an existing one.
    pub async fn on_subscribe<I>(
        &self,
        connection: &Arc<dyn Connection>,
        channels: I,
        last_seen_id: Option<EventId>,
    ) -> Result<Delivery>
    where
        I: IntoIterator<Item = Channel>,
    {
        let tail_id = self.store.tail_id().await?;
        self.registry
            .set_subscription(
                connection,
                channels,
                last_seen_id,
                connection.session_id(),
                tail_id,
            )
            .await;
        Ok(self.dispatcher.deliver(connection).await?)
    }

    /// Forget the connection's subscription. Safe to call for unknown
    /// connections.
    pub async fn on_disconnect(&self, connection: &dyn Connection) {
        self.registry.forget(connection.id()).await;
    }

    /// Deliver to every connection subscribed to any of `channels`.
    pub async fn dispatch(&self, channels: &[NamespacedChannel]) -> DispatchSummary {
        self.dispatcher.dispatch(channels).await
    }

    /// Deliver to every registered connection.
    pub async fn resync(&self) -> DispatchSummary {
        self.dispatcher.resync().await
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            let _ = running.stop.send(true);
        }
    }
}

/// Every `interval`: vacuum expired events and drop subscriptions of
/// connections that went away without a disconnect.
async fn maintenance_loop(
    store: Arc<dyn EventStore>,
    registry: Arc<SubscriptionRegistry>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    debug!(interval_secs = interval.as_secs(), "Maintenance task started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                match store.vacuum().await {
                    Ok(0) => {}
                    Ok(removed) => debug!(removed, "Vacuumed expired events"),
                    Err(e) => warn!(error = %e, "Vacuum failed"),
                }
                match registry.prune().await {
                    0 => {}
                    pruned => debug!(pruned, "Pruned dropped connections"),
                }
            }
            _ = stop_requested(&mut stop) => break,
        }
    }

    debug!("Maintenance task stopped");
}
