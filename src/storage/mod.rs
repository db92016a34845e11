//! Storage implementations.

use std::sync::Arc;

use tracing::info;

use crate::config::{Config, StorageType};
use crate::interfaces::Notifier;
use crate::notify::ChannelNotifier;

pub mod helpers;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use crate::interfaces::event_store::{EventStore, Result, StorageError};
pub use memory::MemoryEventStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresEventStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteEventStore;

/// The persistence and notification pair the bus runs on.
#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn EventStore>,
    pub notifier: Arc<dyn Notifier>,
}

/// Initialize the backend based on configuration.
///
/// PostgreSQL gets LISTEN/NOTIFY wakeups; memory and SQLite use the
/// in-process notifier, so they only fan out within one process.
pub async fn init_backend(
    config: &Config,
) -> std::result::Result<Backend, Box<dyn std::error::Error + Send + Sync>> {
    let horizon = config.bus.horizon();

    match config.storage.storage_type {
        StorageType::Memory => {
            info!(storage = "memory", "Event store initialized");
            Ok(Backend {
                store: Arc::new(MemoryEventStore::new(horizon)),
                notifier: Arc::new(ChannelNotifier::new()),
            })
        }
        StorageType::Sqlite => {
            #[cfg(feature = "sqlite")]
            {
                let pool = connect_sqlite(&config.storage.sqlite.path).await?;
                let store = SqliteEventStore::new(pool, horizon);
                store.init().await?;
                info!(storage = "sqlite", path = %config.storage.sqlite.path, "Event store initialized");
                Ok(Backend {
                    store: Arc::new(store),
                    notifier: Arc::new(ChannelNotifier::new()),
                })
            }

            #[cfg(not(feature = "sqlite"))]
            {
                tracing::error!("SQLite storage requested but 'sqlite' feature is not enabled");
                Err("SQLite support requires the 'sqlite' feature. Rebuild with --features sqlite".into())
            }
        }
        StorageType::Postgres => {
            #[cfg(feature = "postgres")]
            {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(config.storage.postgres.max_connections)
                    .connect(&config.storage.postgres.uri)
                    .await?;
                let store = PostgresEventStore::new(pool.clone(), horizon);
                store.init().await?;
                let notifier = crate::notify::PgNotifier::new(pool, &config.bus.notify_function)?;
                info!(storage = "postgres", "Event store initialized");
                Ok(Backend {
                    store: Arc::new(store),
                    notifier: Arc::new(notifier),
                })
            }

            #[cfg(not(feature = "postgres"))]
            {
                tracing::error!("PostgreSQL storage requested but 'postgres' feature is not enabled");
                Err("PostgreSQL support requires the 'postgres' feature. Rebuild with --features postgres".into())
            }
        }
    }
}

/// Open a SQLite pool. `:memory:` gets a single long-lived connection,
/// since every new connection would otherwise see its own empty database.
#[cfg(feature = "sqlite")]
pub async fn connect_sqlite(path: &str) -> std::result::Result<sqlx::SqlitePool, sqlx::Error> {
    use sqlx::sqlite::SqlitePoolOptions;

    if path == ":memory:" {
        return SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await;
    }

    if let Some(parent) = std::path::Path::new(path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    sqlx::SqlitePool::connect(&format!("sqlite:{path}?mode=rwc")).await
}
