//! Session validators.
//!
//! [`InMemorySessions`] is a session table held in process memory, enough
//! for embedding the bus next to an HTTP layer that keeps its own session
//! store in sync. [`CachingSessionValidator`] wraps any validator with a
//! bounded result cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::interfaces::session::{SessionInfo, SessionInvalid, SessionValidator};
use crate::utils::clock::{Clock, SystemClock};

/// Default lifetime of a cached positive result.
pub const DEFAULT_POSITIVE_TTL: Duration = Duration::from_secs(30);
/// Default lifetime of a cached negative result.
pub const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(2);
/// Default cache capacity.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

struct SessionRecord {
    info: SessionInfo,
    revoked: bool,
}

/// Thread-safe in-memory session table.
pub struct InMemorySessions {
    sessions: RwLock<HashMap<String, SessionRecord>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemorySessions {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySessions {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register or replace a session. Clears any revocation.
    pub async fn insert(&self, session_id: impl Into<String>, info: SessionInfo) {
        self.sessions.write().await.insert(
            session_id.into(),
            SessionRecord {
                info,
                revoked: false,
            },
        );
    }

    /// Mark a session revoked. Returns false if it is unknown.
    pub async fn revoke(&self, session_id: &str) -> bool {
        match self.sessions.write().await.get_mut(session_id) {
            Some(record) => {
                record.revoked = true;
                true
            }
            None => false,
        }
    }

    /// Forget a session entirely; later validations report `Unknown`.
    pub async fn remove(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SessionValidator for InMemorySessions {
    async fn validate(&self, session_id: &str) -> Result<SessionInfo, SessionInvalid> {
        let sessions = self.sessions.read().await;
        let record = sessions.get(session_id).ok_or(SessionInvalid::Unknown)?;
        if record.revoked {
            return Err(SessionInvalid::Revoked);
        }
        if record
            .info
            .expires_at
            .is_some_and(|expires_at| expires_at <= self.clock.now())
        {
            return Err(SessionInvalid::Expired);
        }
        Ok(record.info.clone())
    }
}

struct CachedResult {
    outcome: Result<SessionInfo, SessionInvalid>,
    valid_until: DateTime<Utc>,
}

/// Caching wrapper around another validator.
///
/// Negative results are kept for `negative_ttl`. Positive results are kept
/// for `positive_ttl`, cut short by the session's own expiry. When the
/// cache is full, expired entries are dropped first, then the entries
/// closest to expiry.
pub struct CachingSessionValidator<V> {
    inner: V,
    cache: RwLock<HashMap<String, CachedResult>>,
    positive_ttl: Duration,
    negative_ttl: Duration,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl<V: SessionValidator> CachingSessionValidator<V> {
    pub fn new(inner: V) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
            positive_ttl: DEFAULT_POSITIVE_TTL,
            negative_ttl: DEFAULT_NEGATIVE_TTL,
            max_entries: DEFAULT_MAX_ENTRIES,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_ttls(mut self, positive_ttl: Duration, negative_ttl: Duration) -> Self {
        self.positive_ttl = positive_ttl;
        self.negative_ttl = negative_ttl;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn inner(&self) -> &V {
        &self.inner
    }

    /// Drop the cached result for one session.
    pub async fn invalidate(&self, session_id: &str) {
        self.cache.write().await.remove(session_id);
    }

    pub async fn cached_len(&self) -> usize {
        self.cache.read().await.len()
    }

    fn valid_until(
        &self,
        now: DateTime<Utc>,
        outcome: &Result<SessionInfo, SessionInvalid>,
    ) -> Option<DateTime<Utc>> {
        match outcome {
            Ok(info) => {
                let ttl_end = add(now, self.positive_ttl)?;
                match info.expires_at {
                    Some(expires_at) if expires_at <= now => None,
                    Some(expires_at) => Some(ttl_end.min(expires_at)),
                    None => Some(ttl_end),
                }
            }
            Err(_) => add(now, self.negative_ttl),
        }
    }

    async fn store(&self, session_id: &str, result: CachedResult) {
        let mut cache = self.cache.write().await;
        if cache.len() >= self.max_entries && !cache.contains_key(session_id) {
            let now = self.clock.now();
            cache.retain(|_, cached| cached.valid_until > now);
            if cache.len() >= self.max_entries {
                let oldest = cache
                    .iter()
                    .min_by_key(|(_, cached)| cached.valid_until)
                    .map(|(id, _)| id.clone());
                if let Some(oldest) = oldest {
                    cache.remove(&oldest);
                }
            }
        }
        cache.insert(session_id.to_string(), result);
    }
}

#[async_trait]
impl<V: SessionValidator> SessionValidator for CachingSessionValidator<V> {
    async fn validate(&self, session_id: &str) -> Result<SessionInfo, SessionInvalid> {
        let now = self.clock.now();
        if let Some(cached) = self.cache.read().await.get(session_id) {
            if cached.valid_until > now {
                return cached.outcome.clone();
            }
        }

        let outcome = self.inner.validate(session_id).await;
        match self.valid_until(now, &outcome) {
            Some(valid_until) => {
                self.store(
                    session_id,
                    CachedResult {
                        outcome: outcome.clone(),
                        valid_until,
                    },
                )
                .await;
            }
            None => {
                debug!(session = session_id, "Session result not cacheable");
                self.invalidate(session_id).await;
            }
        }
        outcome
    }
}

fn add(now: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
}

#[cfg(test)]
mod tests;
