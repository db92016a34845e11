use super::*;
use crate::utils::clock::ManualClock;
use std::sync::atomic::{AtomicUsize, Ordering};

struct CountingValidator {
    sessions: InMemorySessions,
    calls: AtomicUsize,
}

impl CountingValidator {
    fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            sessions: InMemorySessions::new().with_clock(clock),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionValidator for CountingValidator {
    async fn validate(&self, session_id: &str) -> Result<SessionInfo, SessionInvalid> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sessions.validate(session_id).await
    }
}

fn caching(clock: &Arc<ManualClock>) -> CachingSessionValidator<CountingValidator> {
    CachingSessionValidator::new(CountingValidator::new(Arc::clone(clock)))
        .with_ttls(Duration::from_secs(30), Duration::from_secs(2))
        .with_clock(Arc::clone(clock) as Arc<dyn Clock>)
}

fn secs(n: i64) -> chrono::Duration {
    chrono::Duration::seconds(n)
}

// ============================================================================
// InMemorySessions
// ============================================================================

#[tokio::test]
async fn test_unknown_session() {
    let sessions = InMemorySessions::new();
    assert_eq!(
        sessions.validate("nope").await,
        Err(SessionInvalid::Unknown)
    );
}

#[tokio::test]
async fn test_valid_session_returns_info() {
    let sessions = InMemorySessions::new();
    let info = SessionInfo::new("alice").with_context("lang", serde_json::json!("en"));
    sessions.insert("s1", info.clone()).await;

    assert_eq!(sessions.validate("s1").await, Ok(info));
}

#[tokio::test]
async fn test_revoked_session() {
    let sessions = InMemorySessions::new();
    sessions.insert("s1", SessionInfo::new("alice")).await;

    assert!(sessions.revoke("s1").await);
    assert!(!sessions.revoke("s2").await);
    assert_eq!(sessions.validate("s1").await, Err(SessionInvalid::Revoked));

    sessions.insert("s1", SessionInfo::new("alice")).await;
    assert!(sessions.validate("s1").await.is_ok());
}

#[tokio::test]
async fn test_session_expires_with_clock() {
    let clock = Arc::new(ManualClock::starting_now());
    let sessions = InMemorySessions::new().with_clock(clock.clone());
    let expires_at = clock.now() + secs(10);
    sessions
        .insert("s1", SessionInfo::new("alice").with_expiry(expires_at))
        .await;

    assert!(sessions.validate("s1").await.is_ok());
    clock.advance(Duration::from_secs(10));
    assert_eq!(sessions.validate("s1").await, Err(SessionInvalid::Expired));
}

#[tokio::test]
async fn test_remove_makes_session_unknown() {
    let sessions = InMemorySessions::new();
    sessions.insert("s1", SessionInfo::new("alice")).await;
    assert_eq!(sessions.len().await, 1);

    assert!(sessions.remove("s1").await);
    assert!(sessions.is_empty().await);
    assert_eq!(sessions.validate("s1").await, Err(SessionInvalid::Unknown));
}

// ============================================================================
// CachingSessionValidator
// ============================================================================

#[tokio::test]
async fn test_positive_result_is_cached() {
    let clock = Arc::new(ManualClock::starting_now());
    let validator = caching(&clock);
    validator
        .inner()
        .sessions
        .insert("s1", SessionInfo::new("alice"))
        .await;

    for _ in 0..3 {
        assert!(validator.validate("s1").await.is_ok());
    }
    assert_eq!(validator.inner().calls(), 1);

    clock.advance(Duration::from_secs(31));
    assert!(validator.validate("s1").await.is_ok());
    assert_eq!(validator.inner().calls(), 2);
}

#[tokio::test]
async fn test_positive_cache_bounded_by_session_lifetime() {
    let clock = Arc::new(ManualClock::starting_now());
    let validator = caching(&clock);
    let expires_at = clock.now() + secs(5);
    validator
        .inner()
        .sessions
        .insert("s1", SessionInfo::new("alice").with_expiry(expires_at))
        .await;

    assert!(validator.validate("s1").await.is_ok());
    clock.advance(Duration::from_secs(5));

    assert_eq!(validator.validate("s1").await, Err(SessionInvalid::Expired));
    assert_eq!(validator.inner().calls(), 2);
}

#[tokio::test]
async fn test_negative_result_cached_briefly() {
    let clock = Arc::new(ManualClock::starting_now());
    let validator = caching(&clock);

    assert_eq!(validator.validate("s1").await, Err(SessionInvalid::Unknown));
    validator
        .inner()
        .sessions
        .insert("s1", SessionInfo::new("alice"))
        .await;
    assert_eq!(validator.validate("s1").await, Err(SessionInvalid::Unknown));
    assert_eq!(validator.inner().calls(), 1);

    clock.advance(Duration::from_secs(3));
    assert!(validator.validate("s1").await.is_ok());
    assert_eq!(validator.inner().calls(), 2);
}

#[tokio::test]
async fn test_invalidate_forces_lookup() {
    let clock = Arc::new(ManualClock::starting_now());
    let validator = caching(&clock);
    validator
        .inner()
        .sessions
        .insert("s1", SessionInfo::new("alice"))
        .await;

    assert!(validator.validate("s1").await.is_ok());
    validator.inner().sessions.revoke("s1").await;
    assert!(validator.validate("s1").await.is_ok());

    validator.invalidate("s1").await;
    assert_eq!(validator.validate("s1").await, Err(SessionInvalid::Revoked));
}

#[tokio::test]
async fn test_cache_capacity_is_bounded() {
    let clock = Arc::new(ManualClock::starting_now());
    let validator = caching(&clock).with_max_entries(2);

    for id in ["a", "b", "c", "d"] {
        let _ = validator.validate(id).await;
    }

    assert_eq!(validator.cached_len().await, 2);
}
