//! Per-user runtime state
//!
//! One [`UserContext`] per user holds the TTL-bounded authentication cache
//! and the in-flight task counter. Concurrent tasks of the same user share
//! one cached `(token, session)` per adapter; contexts of different users
//! never mix. The [`LoginRateLimiter`] guards interactive authentication.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::adapters::JudgeAuth;

/// Auth cache entries older than this are ignored and re-created
pub const AUTH_TTL: Duration = Duration::from_secs(3600);

struct AuthEntry {
    auth: JudgeAuth,
    created_at: Instant,
}

/// Runtime state for one user
pub struct UserContext {
    user_id: i64,
    username: String,
    ttl: Duration,
    auth: Mutex<HashMap<String, AuthEntry>>,
    /// Serializes logins so concurrent tasks produce one session, not many
    login_mutex: tokio::sync::Mutex<()>,
    active_tasks: AtomicI64,
}

impl UserContext {
    pub fn new(user_id: i64, username: impl Into<String>) -> Self {
        UserContext {
            user_id,
            username: username.into(),
            ttl: AUTH_TTL,
            auth: Mutex::new(HashMap::new()),
            login_mutex: tokio::sync::Mutex::new(()),
            active_tasks: AtomicI64::new(0),
        }
    }

    /// Hold this across check-then-authenticate so two concurrent cache
    /// misses resolve to a single login
    pub async fn login_guard(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.login_mutex.lock().await
    }

    #[cfg(test)]
    fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    fn lock_auth(&self) -> MutexGuard<'_, HashMap<String, AuthEntry>> {
        self.auth.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The cached session for `adapter`, unless it has aged past the TTL
    pub fn get_auth(&self, adapter: &str) -> Option<JudgeAuth> {
        let map = self.lock_auth();
        let entry = map.get(adapter)?;
        if entry.created_at.elapsed() > self.ttl {
            debug!(user_id = self.user_id, adapter, "cached auth expired");
            return None;
        }
        Some(entry.auth.clone())
    }

    pub fn set_auth(&self, adapter: &str, auth: JudgeAuth) {
        debug!(user_id = self.user_id, adapter, "auth cached");
        self.lock_auth().insert(
            adapter.to_string(),
            AuthEntry {
                auth,
                created_at: Instant::now(),
            },
        );
    }

    /// Drop the cached session, e.g. after a 401-class response
    pub fn clear_auth(&self, adapter: &str) {
        debug!(user_id = self.user_id, adapter, "auth invalidated");
        self.lock_auth().remove(adapter);
    }

    pub fn increment_tasks(&self) {
        self.active_tasks.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrement_tasks(&self) {
        self.active_tasks.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn active_task_count(&self) -> i64 {
        self.active_tasks.load(Ordering::SeqCst)
    }
}

/// Process-wide map of user contexts, keyed by user id
#[derive(Default)]
pub struct UserContextRegistry {
    contexts: Mutex<HashMap<i64, Arc<UserContext>>>,
}

impl UserContextRegistry {
    pub fn new() -> Self {
        UserContextRegistry::default()
    }

    pub fn get_or_create(&self, user_id: i64, username: &str) -> Arc<UserContext> {
        let mut map = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(user_id)
            .or_insert_with(|| Arc::new(UserContext::new(user_id, username)))
            .clone()
    }

    pub fn get(&self, user_id: i64) -> Option<Arc<UserContext>> {
        self.contexts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&user_id)
            .cloned()
    }
}

/// Too many failed logins for one identifier
#[derive(Debug, Error)]
#[error("login locked for {0:?} after repeated failures")]
pub struct LoginLocked(pub Duration);

/// Sliding-window limiter: 5 failed attempts per 5-minute window locks the
/// identifier out for 15 minutes
pub struct LoginRateLimiter {
    window: Duration,
    lockout: Duration,
    max_failures: usize,
    state: Mutex<HashMap<String, LoginState>>,
}

#[derive(Default)]
struct LoginState {
    failures: VecDeque<Instant>,
    locked_until: Option<Instant>,
}

impl LoginRateLimiter {
    pub fn new() -> Self {
        LoginRateLimiter::with_policy(Duration::from_secs(300), Duration::from_secs(900), 5)
    }

    pub fn with_policy(window: Duration, lockout: Duration, max_failures: usize) -> Self {
        LoginRateLimiter {
            window,
            lockout,
            max_failures,
            state: Mutex::new(HashMap::new()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, HashMap<String, LoginState>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Check before attempting authentication
    pub fn check(&self, identifier: &str) -> Result<(), LoginLocked> {
        let mut map = self.lock_state();
        let Some(state) = map.get_mut(identifier) else {
            return Ok(());
        };
        if let Some(until) = state.locked_until {
            let remaining = until.saturating_duration_since(Instant::now());
            if !remaining.is_zero() {
                return Err(LoginLocked(remaining));
            }
            state.locked_until = None;
            state.failures.clear();
        }
        Ok(())
    }

    pub fn record_failure(&self, identifier: &str) {
        let mut map = self.lock_state();
        let state = map.entry(identifier.to_string()).or_default();
        let now = Instant::now();
        state.failures.push_back(now);
        while state
            .failures
            .front()
            .is_some_and(|t| now.duration_since(*t) > self.window)
        {
            state.failures.pop_front();
        }
        if state.failures.len() >= self.max_failures {
            debug!(identifier, "login lockout triggered");
            state.locked_until = Some(now + self.lockout);
        }
    }

    pub fn record_success(&self, identifier: &str) {
        self.lock_state().remove(identifier);
    }
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        LoginRateLimiter::new()
    }
}
