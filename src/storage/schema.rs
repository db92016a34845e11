//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Event log table schema.
#[derive(Iden)]
pub enum BusEvents {
    #[iden = "bus_events"]
    Table,
    #[iden = "id"]
    Id,
    /// JSON form of the namespaced channel.
    #[iden = "channel"]
    Channel,
    /// JSON `{"type":…,"payload":…}`.
    #[iden = "message"]
    Message,
    /// RFC 3339, UTC, fixed microsecond precision so text order is time order.
    #[iden = "created_at"]
    CreatedAt,
}

/// SQLite's AUTOINCREMENT bookkeeping table. `seq` is the largest id ever
/// handed out for `name`, whether or not that row still exists.
#[derive(Iden)]
pub enum SqliteSequence {
    #[iden = "sqlite_sequence"]
    Table,
    #[iden = "name"]
    Name,
    #[iden = "seq"]
    Seq,
}

/// SQLite DDL, executed statement by statement.
pub const SQLITE_SCHEMA: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS bus_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    channel TEXT NOT NULL,
    message TEXT NOT NULL,
    created_at TEXT NOT NULL
)"#,
    "CREATE INDEX IF NOT EXISTS idx_bus_events_channel ON bus_events(channel)",
    "CREATE INDEX IF NOT EXISTS idx_bus_events_created_at ON bus_events(created_at)",
];

/// PostgreSQL DDL, executed statement by statement.
pub const POSTGRES_SCHEMA: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS bus_events (
    id BIGSERIAL PRIMARY KEY,
    channel TEXT NOT NULL,
    message TEXT NOT NULL,
    created_at TEXT NOT NULL
)"#,
    "CREATE INDEX IF NOT EXISTS idx_bus_events_channel ON bus_events(channel)",
    "CREATE INDEX IF NOT EXISTS idx_bus_events_created_at ON bus_events(created_at)",
];

/// Highest committed id, falling back to the id sequence once vacuum has
/// emptied the table. NULL from the sequence means nothing was ever appended.
pub const POSTGRES_TAIL_ID: &str = r#"
SELECT COALESCE(
    MAX(id),
    pg_sequence_last_value(pg_get_serial_sequence('bus_events', 'id')::regclass),
    0
)::BIGINT
FROM bus_events"#;
