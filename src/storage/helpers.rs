//! Shared helpers for storage implementations.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::channel::NamespacedChannel;
use crate::event::{Event, EventId, Message};
use crate::interfaces::event_store::{Result, StorageError};

/// Format a timestamp for the `created_at` column.
///
/// Fixed precision and a `Z` suffix keep lexical order equal to time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a `created_at` column value.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidTimestamp(format!("{raw}: {e}")))
}

/// `now - span`, saturating at the minimum representable time.
pub fn cutoff(now: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(span)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Rebuild an event from its stored columns.
pub fn decode_event(id: EventId, channel: &str, message: &str, created_at: &str) -> Result<Event> {
    let channel = NamespacedChannel::from_json(channel)?;
    let message = Message::from_json(message)?;
    Ok(Event {
        id,
        channel,
        event_type: message.event_type,
        payload: message.payload,
        created_at: parse_timestamp(created_at)?,
    })
}
