//! Notification backends and the wakeup payload codec.
//!
//! A wakeup payload is the compact JSON list of namespaced channels that may
//! have new events, e.g. `[["db","a"],["db","res.partner",7]]`.

use std::collections::BTreeSet;

use crate::channel::NamespacedChannel;

pub mod channel;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use channel::ChannelNotifier;
#[cfg(feature = "postgres")]
pub use postgres::PgNotifier;

/// Encode a channel set as one or more wakeup payloads.
///
/// Channels are deduplicated and sorted. When the encoded list exceeds
/// `max_bytes` it is split in halves until every part fits; a single
/// channel that is too large on its own is still emitted alone.
pub fn encode_wakeups(channels: &BTreeSet<NamespacedChannel>, max_bytes: usize) -> Vec<String> {
    let channels: Vec<&NamespacedChannel> = channels.iter().collect();
    let mut payloads = Vec::new();
    split_into(&channels, max_bytes, &mut payloads);
    payloads
}

fn split_into(channels: &[&NamespacedChannel], max_bytes: usize, out: &mut Vec<String>) {
    if channels.is_empty() {
        return;
    }
    let payload = encode_list(channels);
    if payload.len() <= max_bytes || channels.len() == 1 {
        out.push(payload);
        return;
    }
    let (left, right) = channels.split_at(channels.len() / 2);
    split_into(left, max_bytes, out);
    split_into(right, max_bytes, out);
}

fn encode_list(channels: &[&NamespacedChannel]) -> String {
    let values: Vec<serde_json::Value> = channels.iter().map(|c| (*c).into()).collect();
    serde_json::Value::Array(values).to_string()
}

/// Decode a wakeup payload.
pub fn decode_wakeup(payload: &str) -> Result<Vec<NamespacedChannel>, serde_json::Error> {
    serde_json::from_str(payload)
}
