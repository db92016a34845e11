//! PostgreSQL EventStore implementation.
//!
//! Besides the self-contained [`EventStore::append`], [`PostgresEventStore::append_in`]
//! lets a caller write events inside its own transaction, so that rolling the
//! caller back drops the events too. The caller then announces the channels
//! after its commit (see `Publisher::announce`).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sea_query::{Expr, Order, PostgresQueryBuilder, Query};
use sea_query_binder::SqlxBinder;
use sqlx::{PgConnection, PgPool, Row};

use crate::channel::NamespacedChannel;
use crate::event::{Event, EventId, NewEvent};
use crate::interfaces::event_store::{EventStore, Result};
use crate::storage::helpers::{cutoff, decode_event, format_timestamp};
use crate::storage::schema::{BusEvents, POSTGRES_SCHEMA, POSTGRES_TAIL_ID};
use crate::utils::clock::{Clock, SystemClock};

/// PostgreSQL implementation of EventStore.
pub struct PostgresEventStore {
    pool: PgPool,
    horizon: Duration,
    clock: Arc<dyn Clock>,
}

impl PostgresEventStore {
    /// Create a new PostgreSQL event store.
    pub fn new(pool: PgPool, horizon: Duration) -> Self {
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
        for statement in POSTGRES_SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Append within the caller's transaction.
    ///
    /// Ids are assigned by the `BIGSERIAL` sequence; across concurrent
    /// transactions they are unique but may become visible out of order.
    pub async fn append_in(
        &self,
        conn: &mut PgConnection,
        events: Vec<NewEvent>,
    ) -> Result<Vec<EventId>> {
        let created_at = format_timestamp(self.clock.now());
        let mut ids = Vec::with_capacity(events.len());

        for event in events {
            let (sql, values) = Query::insert()
                .into_table(BusEvents::Table)
                .columns([BusEvents::Channel, BusEvents::Message, BusEvents::CreatedAt])
                .values_panic([
                    event.channel.to_json().into(),
                    event.message_json()?.into(),
                    created_at.clone().into(),
                ])
                .returning_col(BusEvents::Id)
                .build_sqlx(PostgresQueryBuilder);

            let row = sqlx::query_with(&sql, values).fetch_one(&mut *conn).await?;
            ids.push(row.try_get::<i64, _>(0)?);
        }

        Ok(ids)
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(&self, events: Vec<NewEvent>) -> Result<Vec<EventId>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let ids = self.append_in(&mut *tx, events).await?;
        tx.commit().await?;
        Ok(ids)
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

        let (sql, values) = query.build_sqlx(PostgresQueryBuilder);
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

    /// `MAX(id)` while rows exist. The sequence is only consulted once the
    /// table is empty: it also counts ids of transactions still in flight.
    async fn tail_id(&self) -> Result<EventId> {
        let tail: i64 = sqlx::query_scalar(POSTGRES_TAIL_ID)
            .fetch_one(&self.pool)
            .await?;
        Ok(tail)
    }

    async fn vacuum(&self) -> Result<u64> {
        let threshold = format_timestamp(cutoff(self.clock.now(), self.horizon * 2));

        let (sql, values) = Query::delete()
            .from_table(BusEvents::Table)
            .and_where(Expr::col(BusEvents::CreatedAt).lt(threshold))
            .build_sqlx(PostgresQueryBuilder);

        let result = sqlx::query_with(&sql, values).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
