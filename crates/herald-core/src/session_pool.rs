//! Reusable automation-engine sessions, one per source key.
//!
//! Starting a headless browser is expensive, so sessions are created lazily
//! and handed out repeatedly until they hit their usage or lifetime limit.
//! The pool owns every session and is the only place that closes them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::traits::AutomationEngine;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Soft expiry limits applied to every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub max_usage: u32,
    pub max_lifetime: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_usage: 50,
            max_lifetime: Duration::from_secs(3600),
        }
    }
}

/// Fixed launch profile for new sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionProfile {
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub user_agent: String,
    /// Extra engine arguments (resource and fingerprinting flags).
    pub args: Vec<String>,
}

impl Default for SessionProfile {
    fn default() -> Self {
        let args = [
            "--no-sandbox",
            "--disable-dev-shm-usage",
            "--disable-gpu",
            "--disable-extensions",
            "--disable-background-networking",
            "--disable-background-timer-throttling",
            "--disable-renderer-backgrounding",
            "--disable-backgrounding-occluded-windows",
            "--disable-features=TranslateUI",
            "--disable-blink-features=AutomationControlled",
            "--no-first-run",
            "--mute-audio",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        Self {
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            args,
        }
    }
}

struct Session<H> {
    handle: Arc<H>,
    created_at: Instant,
    last_used: Instant,
    usage_count: u32,
}

impl<H> Session<H> {
    fn is_expired(&self, policy: &SessionPolicy) -> bool {
        self.usage_count >= policy.max_usage || self.created_at.elapsed() >= policy.max_lifetime
    }
}

/// A borrowed session for one extraction attempt.
///
/// Holders must never close the handle themselves.
pub struct SessionLease<H> {
    pub source_key: String,
    pub handle: Arc<H>,
    /// Usage count after this checkout.
    pub usage_count: u32,
}

/// Snapshot of one live session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub source_key: String,
    pub usage_count: u32,
    pub age_secs: u64,
    pub idle_secs: u64,
}

/// Pool-wide counters.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub live_sessions: usize,
    pub created_total: u64,
    pub closed_total: u64,
    pub sessions: Vec<SessionInfo>,
}

type Slot<H> = Arc<tokio::sync::Mutex<Option<Session<H>>>>;

/// Per-key session pool over an [`AutomationEngine`].
pub struct SessionPool<E: AutomationEngine> {
    engine: E,
    profile: SessionProfile,
    policy: SessionPolicy,
    slots: Mutex<HashMap<String, Slot<E::Handle>>>,
    created_total: AtomicU64,
    closed_total: AtomicU64,
}

impl<E: AutomationEngine> SessionPool<E> {
    pub fn new(engine: E, profile: SessionProfile, policy: SessionPolicy) -> Self {
        Self {
            engine,
            profile,
            policy,
            slots: Mutex::new(HashMap::new()),
            created_total: AtomicU64::new(0),
            closed_total: AtomicU64::new(0),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot<E::Handle>>> {
        self.slots.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Session pool mutex was poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn slot(&self, key: &str) -> Slot<E::Handle> {
        self.slots().entry(key.to_string()).or_default().clone()
    }

    fn all_slots(&self) -> Vec<(String, Slot<E::Handle>)> {
        self.slots()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    async fn close_session(&self, key: &str, session: Session<E::Handle>, reason: &str) {
        match self.engine.close(&session.handle).await {
            Ok(()) => {
                tracing::info!(
                    source = %key,
                    usage = session.usage_count,
                    age_s = session.created_at.elapsed().as_secs(),
                    reason,
                    "Closed session"
                );
            }
            Err(e) => {
                tracing::warn!(source = %key, reason, error = %e, "Failed to close session");
            }
        }
        self.closed_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Check out the session for `key`, creating or replacing it as needed.
    ///
    /// Calls for the same key are serialized; different keys proceed in
    /// parallel. Creation honours `cancel` and never stores a half-created
    /// session.
    pub async fn acquire(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<SessionLease<E::Handle>, AppError> {
        let slot = self.slot(key);
        let mut guard = tokio::select! {
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            guard = slot.lock() => guard,
        };

        if let Some(session) = guard.as_mut() {
            if !session.is_expired(&self.policy) {
                session.usage_count += 1;
                session.last_used = Instant::now();
                return Ok(SessionLease {
                    source_key: key.to_string(),
                    handle: session.handle.clone(),
                    usage_count: session.usage_count,
                });
            }
        }

        if let Some(old) = guard.take() {
            self.close_session(key, old, "expired").await;
        }

        let started = Instant::now();
        let handle = tokio::select! {
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            res = self.engine.start(&self.profile) => {
                res.map_err(|e| AppError::session(key, e.to_string()))?
            }
        };
        self.created_total.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            source = %key,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Created session"
        );

        let now = Instant::now();
        let handle = Arc::new(handle);
        *guard = Some(Session {
            handle: handle.clone(),
            created_at: now,
            last_used: now,
            usage_count: 1,
        });

        Ok(SessionLease {
            source_key: key.to_string(),
            handle,
            usage_count: 1,
        })
    }

    /// Close the session for `key` if it is expired. Returns true if one was closed.
    pub async fn release_if_expired(&self, key: &str) -> bool {
        let slot = self.slots().get(key).cloned();
        let Some(slot) = slot else {
            return false;
        };
        let mut guard = slot.lock().await;
        match guard.take_if(|s| s.is_expired(&self.policy)) {
            Some(session) => {
                self.close_session(key, session, "expired").await;
                true
            }
            None => false,
        }
    }

    /// Close every expired session. Returns how many were closed.
    pub async fn cleanup_expired(&self) -> usize {
        let mut closed = 0;
        for (key, _) in self.all_slots() {
            if self.release_if_expired(&key).await {
                closed += 1;
            }
        }
        if closed > 0 {
            tracing::info!(closed, "Cleaned up expired sessions");
        }
        closed
    }

    /// Close every live session, tolerating individual failures.
    /// Returns how many close attempts were made.
    pub async fn close_all(&self) -> usize {
        let slots: Vec<_> = self.slots().drain().collect();
        let mut closed = 0;
        for (key, slot) in slots {
            if let Some(session) = slot.lock().await.take() {
                self.close_session(&key, session, "shutdown").await;
                closed += 1;
            }
        }
        tracing::info!(closed, "Session pool closed");
        closed
    }

    pub async fn stats(&self) -> PoolStats {
        let mut sessions = Vec::new();
        for (key, slot) in self.all_slots() {
            if let Some(s) = slot.lock().await.as_ref() {
                sessions.push(SessionInfo {
                    source_key: key,
                    usage_count: s.usage_count,
                    age_secs: s.created_at.elapsed().as_secs(),
                    idle_secs: s.last_used.elapsed().as_secs(),
                });
            }
        }
        sessions.sort_by(|a, b| a.source_key.cmp(&b.source_key));

        PoolStats {
            live_sessions: sessions.len(),
            created_total: self.created_total.load(Ordering::Relaxed),
            closed_total: self.closed_total.load(Ordering::Relaxed),
            sessions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockEngine;

    fn pool(engine: MockEngine, max_usage: u32, max_lifetime: Duration) -> SessionPool<MockEngine> {
        SessionPool::new(
            engine,
            SessionProfile::default(),
            SessionPolicy {
                max_usage,
                max_lifetime,
            },
        )
    }

    #[tokio::test]
    async fn sequential_acquires_reuse_one_session() {
        let engine = MockEngine::new("<html></html>");
        let pool = pool(engine.clone(), 50, Duration::from_secs(3600));
        let cancel = CancellationToken::new();

        let mut last = None;
        for _ in 0..5 {
            last = Some(pool.acquire("forexlive", &cancel).await.unwrap());
        }

        assert_eq!(engine.start_count(), 1);
        assert_eq!(last.unwrap().usage_count, 5);
        let stats = pool.stats().await;
        assert_eq!(stats.live_sessions, 1);
        assert_eq!(stats.sessions[0].usage_count, 5);
    }

    #[tokio::test]
    async fn usage_limit_triggers_recreation() {
        let engine = MockEngine::new("<html></html>");
        let pool = pool(engine.clone(), 3, Duration::from_secs(3600));
        let cancel = CancellationToken::new();

        let first = pool.acquire("fxstreet", &cancel).await.unwrap();
        pool.acquire("fxstreet", &cancel).await.unwrap();
        let third = pool.acquire("fxstreet", &cancel).await.unwrap();
        assert_eq!(third.usage_count, 3);
        assert_eq!(engine.close_count(), 0);

        let fourth = pool.acquire("fxstreet", &cancel).await.unwrap();
        assert_eq!(fourth.usage_count, 1);
        assert_eq!(engine.start_count(), 2);
        assert_eq!(engine.closed_ids(), vec![*first.handle]);
        assert_ne!(*first.handle, *fourth.handle);
    }

    #[tokio::test]
    async fn lifetime_limit_triggers_recreation() {
        let engine = MockEngine::new("<html></html>");
        let pool = pool(engine.clone(), 50, Duration::from_millis(30));
        let cancel = CancellationToken::new();

        pool.acquire("kabutan", &cancel).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let lease = pool.acquire("kabutan", &cancel).await.unwrap();

        assert_eq!(lease.usage_count, 1);
        assert_eq!(engine.start_count(), 2);
        assert_eq!(engine.close_count(), 1);
    }

    #[tokio::test]
    async fn keys_get_separate_sessions() {
        let engine = MockEngine::new("<html></html>");
        let pool = pool(engine.clone(), 50, Duration::from_secs(3600));
        let cancel = CancellationToken::new();

        let a = pool.acquire("a", &cancel).await.unwrap();
        let b = pool.acquire("b", &cancel).await.unwrap();

        assert_ne!(*a.handle, *b.handle);
        assert_eq!(engine.start_count(), 2);
    }

    #[tokio::test]
    async fn concurrent_acquires_create_once() {
        let engine = MockEngine::new("<html></html>").with_start_delay(Duration::from_millis(50));
        let pool = Arc::new(pool(engine.clone(), 50, Duration::from_secs(3600)));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move {
                    pool.acquire("investing", &CancellationToken::new())
                        .await
                        .map(|l| *l.handle)
                })
            })
            .collect();

        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap().unwrap());
        }

        assert_eq!(engine.start_count(), 1);
        assert!(ids.iter().all(|id| *id == ids[0]));
    }

    #[tokio::test]
    async fn creation_failure_is_typed_and_isolated() {
        let engine = MockEngine::new("<html></html>").failing_starts(1);
        let pool = pool(engine.clone(), 50, Duration::from_secs(3600));
        let cancel = CancellationToken::new();

        let err = pool.acquire("broken", &cancel).await.err().unwrap();
        assert!(matches!(err, AppError::Session { ref source_key, .. } if source_key == "broken"));

        assert!(pool.acquire("healthy", &cancel).await.is_ok());
        assert_eq!(pool.stats().await.live_sessions, 1);

        // The failed key recovers on the next attempt.
        assert!(pool.acquire("broken", &cancel).await.is_ok());
        assert_eq!(pool.stats().await.live_sessions, 2);
    }

    #[tokio::test]
    async fn cancellation_aborts_creation() {
        let engine = MockEngine::new("<html></html>").with_start_delay(Duration::from_secs(10));
        let pool = pool(engine.clone(), 50, Duration::from_secs(3600));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let err = pool.acquire("slow", &cancel).await.err().unwrap();

        assert!(matches!(err, AppError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(pool.stats().await.live_sessions, 0);
        assert_eq!(pool.stats().await.created_total, 0);
    }

    #[tokio::test]
    async fn close_all_tolerates_failures() {
        let engine = MockEngine::new("<html></html>").failing_close();
        let pool = pool(engine.clone(), 50, Duration::from_secs(3600));
        let cancel = CancellationToken::new();

        pool.acquire("a", &cancel).await.unwrap();
        pool.acquire("b", &cancel).await.unwrap();
        pool.acquire("c", &cancel).await.unwrap();

        assert_eq!(pool.close_all().await, 3);
        assert_eq!(engine.close_count(), 3);
        let stats = pool.stats().await;
        assert_eq!(stats.live_sessions, 0);
        assert_eq!(stats.closed_total, 3);
    }

    #[tokio::test]
    async fn release_and_cleanup_only_touch_expired() {
        let engine = MockEngine::new("<html></html>");
        let pool = pool(engine.clone(), 2, Duration::from_secs(3600));
        let cancel = CancellationToken::new();

        pool.acquire("busy", &cancel).await.unwrap();
        pool.acquire("busy", &cancel).await.unwrap();
        pool.acquire("fresh", &cancel).await.unwrap();

        assert!(!pool.release_if_expired("fresh").await);
        assert!(!pool.release_if_expired("missing").await);
        assert_eq!(pool.cleanup_expired().await, 1);
        assert_eq!(engine.close_count(), 1);

        let stats = pool.stats().await;
        assert_eq!(stats.live_sessions, 1);
        assert_eq!(stats.sessions[0].source_key, "fresh");
    }

    #[test]
    fn default_profile_is_headless_desktop() {
        let profile = SessionProfile::default();
        assert!(profile.headless);
        assert_eq!((profile.viewport_width, profile.viewport_height), (1280, 720));
        assert!(profile.args.iter().any(|a| a == "--disable-dev-shm-usage"));
    }
}
