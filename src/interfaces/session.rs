//! Session validation interface.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Why a session cannot be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionInvalid {
    #[error("session expired")]
    Expired,

    #[error("session unknown")]
    Unknown,

    #[error("session revoked")]
    Revoked,
}

/// A resolved session: who is behind it and with what context.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub principal: String,
    pub context: Map<String, Value>,
    /// When the underlying session stops being valid, if bounded.
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionInfo {
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            context: Map::new(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

/// Resolve a session id to a principal and authorization context.
///
/// Called from dispatcher tasks; implementations must be thread-safe. They
/// may cache negative results briefly but must not cache a positive result
/// past the session's own remaining lifetime.
#[async_trait]
pub trait SessionValidator: Send + Sync {
    async fn validate(&self, session_id: &str) -> Result<SessionInfo, SessionInvalid>;
}
