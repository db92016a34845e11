//! Channel identity.
//!
//! A channel is the addressable unit of subscription. Producers and
//! subscribers name channels in one of three shapes (a free-form tag, a
//! record, or a record plus sub-tag); everything that is indexed, stored or
//! carried in a wakeup uses the [`NamespacedChannel`] form, which prefixes
//! the database identifier.
//!
//! The JSON form is a flat array and is what the event log's `channel`
//! column stores, so string equality on the wire matches equality in memory:
//!
//! | Shape        | JSON                                  |
//! |--------------|---------------------------------------|
//! | tag          | `["db","presence"]`                   |
//! | record       | `["db","res.partner",7]`              |
//! | record + tag | `["db","res.partner",7,"typing"]`     |

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A raw (un-namespaced) channel as named by application code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    /// Free-form tag.
    Tag(String),
    /// A single record of a model.
    Record { model: String, id: i64 },
    /// A sub-topic of a record.
    RecordTag { model: String, id: i64, tag: String },
}

impl Channel {
    pub fn tag(tag: impl Into<String>) -> Self {
        Channel::Tag(tag.into())
    }

    pub fn record(model: impl Into<String>, id: i64) -> Self {
        Channel::Record {
            model: model.into(),
            id,
        }
    }

    pub fn record_tag(model: impl Into<String>, id: i64, tag: impl Into<String>) -> Self {
        Channel::RecordTag {
            model: model.into(),
            id,
            tag: tag.into(),
        }
    }

    /// Prefix the channel with a database identifier.
    pub fn namespaced(self, database: &str) -> NamespacedChannel {
        NamespacedChannel::new(database, self)
    }
}

impl From<&str> for Channel {
    fn from(tag: &str) -> Self {
        Channel::Tag(tag.to_string())
    }
}

impl From<String> for Channel {
    fn from(tag: String) -> Self {
        Channel::Tag(tag)
    }
}

/// A channel carrying its database prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "WireChannel", into = "WireChannel")]
pub struct NamespacedChannel {
    database: String,
    channel: Channel,
}

impl NamespacedChannel {
    pub fn new(database: impl Into<String>, channel: Channel) -> Self {
        Self {
            database: database.into(),
            channel,
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Compact JSON form, as stored in the event log.
    pub fn to_json(&self) -> String {
        Value::from(self).to_string()
    }

    /// Parse the compact JSON form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl fmt::Display for NamespacedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}

impl From<&NamespacedChannel> for Value {
    fn from(channel: &NamespacedChannel) -> Self {
        let db = Value::from(channel.database.as_str());
        match &channel.channel {
            Channel::Tag(tag) => Value::Array(vec![db, Value::from(tag.as_str())]),
            Channel::Record { model, id } => {
                Value::Array(vec![db, Value::from(model.as_str()), Value::from(*id)])
            }
            Channel::RecordTag { model, id, tag } => Value::Array(vec![
                db,
                Value::from(model.as_str()),
                Value::from(*id),
                Value::from(tag.as_str()),
            ]),
        }
    }
}

/// Flat-array wire shape. Variant order matters for untagged decoding.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WireChannel {
    Tag(String, String),
    Record(String, String, i64),
    RecordTag(String, String, i64, String),
}

impl From<WireChannel> for NamespacedChannel {
    fn from(wire: WireChannel) -> Self {
        match wire {
            WireChannel::Tag(db, tag) => NamespacedChannel::new(db, Channel::Tag(tag)),
            WireChannel::Record(db, model, id) => {
                NamespacedChannel::new(db, Channel::Record { model, id })
            }
            WireChannel::RecordTag(db, model, id, tag) => {
                NamespacedChannel::new(db, Channel::RecordTag { model, id, tag })
            }
        }
    }
}

impl From<NamespacedChannel> for WireChannel {
    fn from(channel: NamespacedChannel) -> Self {
        let db = channel.database;
        match channel.channel {
            Channel::Tag(tag) => WireChannel::Tag(db, tag),
            Channel::Record { model, id } => WireChannel::Record(db, model, id),
            Channel::RecordTag { model, id, tag } => WireChannel::RecordTag(db, model, id, tag),
        }
    }
}
