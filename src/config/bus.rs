//! Bus behaviour configuration.

use std::time::Duration;

use serde::Deserialize;

/// Default database identifier used to namespace channels.
pub const DEFAULT_DATABASE: &str = "default";
/// Default replay horizon in seconds.
pub const DEFAULT_HORIZON_SECS: u64 = 50;
/// Default topic on the backend's notification primitive.
pub const DEFAULT_NOTIFICATION_TOPIC: &str = "imbus";
/// Default backend function used to emit notifications.
pub const DEFAULT_NOTIFY_FUNCTION: &str = "pg_notify";
/// Default close code sent when a connection's session is no longer valid.
pub const DEFAULT_CLOSE_CODE_SESSION_EXPIRED: u16 = 4001;
/// PostgreSQL rejects NOTIFY payloads of 8000 bytes or more.
pub const DEFAULT_NOTIFY_PAYLOAD_MAX_BYTES: usize = 7999;
/// Default period of the background vacuum task.
pub const DEFAULT_VACUUM_INTERVAL_SECS: u64 = 600;

/// Bus configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Database identifier prefixed to every channel.
    pub database: String,
    /// Replay horizon. Subscribers starting from id 0 receive events newer
    /// than one horizon; vacuum removes events older than two.
    pub horizon_secs: u64,
    /// Topic the bus emits wakeups on and listens to.
    pub notification_topic: String,
    /// Backend function used to emit notifications (`pg_notify` or a wrapper).
    pub notify_function: String,
    /// Close code sent to a connection whose session became invalid.
    pub close_code_session_expired: u16,
    /// Maximum size of a single wakeup payload; larger channel lists are split.
    pub notify_payload_max_bytes: usize,
    /// Period of the background vacuum task.
    pub vacuum_interval_secs: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            database: DEFAULT_DATABASE.to_string(),
            horizon_secs: DEFAULT_HORIZON_SECS,
            notification_topic: DEFAULT_NOTIFICATION_TOPIC.to_string(),
            notify_function: DEFAULT_NOTIFY_FUNCTION.to_string(),
            close_code_session_expired: DEFAULT_CLOSE_CODE_SESSION_EXPIRED,
            notify_payload_max_bytes: DEFAULT_NOTIFY_PAYLOAD_MAX_BYTES,
            vacuum_interval_secs: DEFAULT_VACUUM_INTERVAL_SECS,
        }
    }
}

impl BusConfig {
    pub fn horizon(&self) -> Duration {
        Duration::from_secs(self.horizon_secs)
    }

    pub fn vacuum_interval(&self) -> Duration {
        Duration::from_secs(self.vacuum_interval_secs)
    }
}
