//! Event types.
//!
//! An [`Event`] is immutable once written: the store assigns its id and
//! creation timestamp. [`NewEvent`] is what producers stage before commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channel::NamespacedChannel;

/// Event id as assigned by the event store. `0` means "nothing seen yet".
pub type EventId = i64;

/// An event staged for append; the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub channel: NamespacedChannel,
    pub event_type: String,
    pub payload: Value,
}

impl NewEvent {
    pub fn new(channel: NamespacedChannel, event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            channel,
            event_type: event_type.into(),
            payload,
        }
    }

    /// The `message` column value: `{"type":…,"payload":…}`.
    pub fn message_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&MessageRef {
            event_type: &self.event_type,
            payload: &self.payload,
        })
    }
}

/// A persisted event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: EventId,
    pub channel: NamespacedChannel,
    pub event_type: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Build a persisted event from a staged one.
    pub fn from_new(id: EventId, event: NewEvent, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            channel: event.channel,
            event_type: event.event_type,
            payload: event.payload,
            created_at,
        }
    }

    /// Wire form of a single notification.
    pub fn notification(&self) -> Notification<'_> {
        Notification {
            id: self.id,
            message: MessageRef {
                event_type: &self.event_type,
                payload: &self.payload,
            },
        }
    }
}

/// Serialize a batch for transport: `[{"id":…,"message":{"type":…,"payload":…}}, …]`.
pub fn notifications_json(events: &[Event]) -> Result<String, serde_json::Error> {
    let notifications: Vec<Notification<'_>> = events.iter().map(Event::notification).collect();
    serde_json::to_string(&notifications)
}

/// The stored message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
}

impl Message {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Borrowed message body used when serializing outgoing batches.
#[derive(Debug, Serialize)]
pub struct MessageRef<'a> {
    #[serde(rename = "type")]
    pub event_type: &'a str,
    pub payload: &'a Value,
}

/// One entry of an outgoing batch.
#[derive(Debug, Serialize)]
pub struct Notification<'a> {
    pub id: EventId,
    pub message: MessageRef<'a>,
}
