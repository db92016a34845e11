//! PostgreSQL LISTEN/NOTIFY notifier.
//!
//! Notifications are emitted through a configurable function (default
//! `pg_notify`) so deployments can route them through a wrapper. Listening
//! holds one dedicated connection per stream via `PgListener`.

use async_trait::async_trait;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tracing::{debug, info};

use crate::interfaces::notifier::{NotificationStream, Notifier, NotifyError, Result};

/// Notifier backed by PostgreSQL `NOTIFY` / `LISTEN`.
pub struct PgNotifier {
    pool: PgPool,
    notify_sql: String,
}

impl PgNotifier {
    /// Create a notifier that emits through `notify_function`.
    ///
    /// The name is interpolated into SQL, so it must be a plain or
    /// schema-qualified identifier.
    pub fn new(pool: PgPool, notify_function: &str) -> Result<Self> {
        if !is_valid_function_name(notify_function) {
            return Err(NotifyError::InvalidFunctionName(notify_function.to_string()));
        }
        Ok(Self {
            pool,
            notify_sql: format!("SELECT {notify_function}($1, $2)"),
        })
    }
}

fn is_valid_function_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

#[async_trait]
impl Notifier for PgNotifier {
    async fn notify(&self, topic: &str, payload: &str) -> Result<()> {
        sqlx::query(&self.notify_sql)
            .bind(topic)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        debug!(topic, bytes = payload.len(), "NOTIFY sent");
        Ok(())
    }

    async fn listen(&self, topic: &str) -> Result<Box<dyn NotificationStream>> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| NotifyError::Connection(e.to_string()))?;
        listener.listen(topic).await?;
        info!(topic, "Listening for PostgreSQL notifications");
        Ok(Box::new(PgStream { listener }))
    }
}

struct PgStream {
    listener: PgListener,
}

#[async_trait]
impl NotificationStream for PgStream {
    async fn recv(&mut self) -> Result<String> {
        // `try_recv` surfaces a lost connection as `None` instead of
        // silently reconnecting, so the listener sees the disruption.
        match self.listener.try_recv().await? {
            Some(notification) => Ok(notification.payload().to_string()),
            None => Err(NotifyError::Closed),
        }
    }
}
