//! SQLite EventStore implementation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::channel::NamespacedChannel;
use crate::event::{Event, EventId, NewEvent};
use crate::interfaces::event_store::{EventStore, Result};
use crate::storage::helpers::{cutoff, decode_event, format_timestamp};
use crate::storage::schema::{BusEvents, SqliteSequence, SQLITE_SCHEMA};
use crate::utils::clock::{Clock, SystemClock};

/// SQLite implementation of EventStore.
pub struct SqliteEventStore {
    pool: SqlitePool,
    horizon: Duration,
    clock: Arc<dyn Clock>,
}

impl SqliteEventStore {
    /// Create a new SQLite event store.
    pub fn new(pool: SqlitePool, horizon: Duration) -> Self {
        Self {
            pool,
            horizon,
            clock: Arc::new(SystemClock),
        }
    }

    /// Read time from `clock` instead of the wall clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        for statement in SQLITE_SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Insert events within an already-started transaction.
    async fn insert_events(
        conn: &mut SqliteConnection,
        events: Vec<NewEvent>,
        created_at: &str,
    ) -> Result<Vec<EventId>> {
        let mut ids = Vec::with_capacity(events.len());

        for event in events {
            let (sql, values) = Query::insert()
                .into_table(BusEvents::Table)
                .columns([BusEvents::Channel, BusEvents::Message, BusEvents::CreatedAt])
                .values_panic([
                    event.channel.to_json().into(),
                    event.message_json()?.into(),
                    created_at.into(),
                ])
                .returning_col(BusEvents::Id)
                .build_sqlx(SqliteQueryBuilder);

            let row = sqlx::query_with(&sql, values).fetch_one(&mut *conn).await?;
            ids.push(row.try_get::<i64, _>(0)?);
        }

        Ok(ids)
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn append(&self, events: Vec<NewEvent>) -> Result<Vec<EventId>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let created_at = format_timestamp(self.clock.now());

        // BEGIN IMMEDIATE acquires the write lock upfront, so concurrent
        // appenders serialize instead of racing to upgrade shared locks.
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result = Self::insert_events(&mut conn, events, &created_at).await;

        match result {
            Ok(ids) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(ids)
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    async fn poll(
        &self,
        channels: &HashSet<NamespacedChannel>,
        since_id: EventId,
    ) -> Result<Vec<Event>> {
        if channels.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = channels.iter().map(NamespacedChannel::to_json).collect();

        let mut query = Query::select();
        query
            .columns([
                BusEvents::Id,
                BusEvents::Channel,
                BusEvents::Message,
                BusEvents::CreatedAt,
            ])
            .from(BusEvents::Table)
            .and_where(Expr::col(BusEvents::Channel).is_in(keys))
            .order_by(BusEvents::Id, Order::Asc);

        if since_id == 0 {
            let window_start = format_timestamp(cutoff(self.clock.now(), self.horizon));
            query.and_where(Expr::col(BusEvents::CreatedAt).gt(window_start));
        } else {
            query.and_where(Expr::col(BusEvents::Id).gt(since_id));
        }

        let (sql, values) = query.build_sqlx(SqliteQueryBuilder);
        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let channel: String = row.try_get("channel")?;
            let message: String = row.try_get("message")?;
            let created_at: String = row.try_get("created_at")?;
            events.push(decode_event(id, &channel, &message, &created_at)?);
        }

        Ok(events)
    }

    /// Read from `sqlite_sequence` rather than `MAX(id)`, so the tail does
    /// not move back when vacuum empties the table.
    async fn tail_id(&self) -> Result<EventId> {
        let (sql, values) = Query::select()
            .column(SqliteSequence::Seq)
            .from(SqliteSequence::Table)
            .and_where(Expr::col(SqliteSequence::Name).eq("bus_events"))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(row.try_get::<i64, _>(0)?),
            None => Ok(0),
        }
    }

    async fn vacuum(&self) -> Result<u64> {
        let threshold = format_timestamp(cutoff(self.clock.now(), self.horizon * 2));

        let (sql, values) = Query::delete()
            .from_table(BusEvents::Table)
            .and_where(Expr::col(BusEvents::CreatedAt).lt(threshold))
            .build_sqlx(SqliteQueryBuilder);

        let result = sqlx::query_with(&sql, values).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
