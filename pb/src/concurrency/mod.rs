//! Concurrency primitives shared across the pipeline
//!
//! - [`SemaphorePool`] - named slots bounding LLM calls, judge reads, judge
//!   writes, and compile-heavy local validation
//! - [`CancelToken`] - cooperative cancellation probed at loop boundaries
//! - [`interruptible_sleep`] - a sleep that returns early on cancellation
//! - [`retry_with_backoff`] - exponential retry for idempotent operations
//! - [`SubmitGate`] - the process-global serializer for remote submissions

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rand::Rng;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Timed out waiting for a named slot
#[derive(Debug, Error)]
#[error("timed out after {timeout:?} waiting for {slot} slot")]
pub struct SlotTimeout {
    pub slot: &'static str,
    pub timeout: Duration,
}

/// Named semaphores with scoped, timeout-bounded acquisition
pub struct SemaphorePool {
    llm: Arc<Semaphore>,
    remote_read: Arc<Semaphore>,
    remote_write: Arc<Semaphore>,
    compile: Arc<Semaphore>,
}

impl SemaphorePool {
    /// `remote_write` must stay strictly below `remote_read` to keep within
    /// judge rate limits; it is clamped if configured otherwise
    pub fn new(llm: usize, remote_read: usize, remote_write: usize, compile: usize) -> Self {
        let remote_write = remote_write.clamp(1, remote_read.saturating_sub(1).max(1));
        SemaphorePool {
            llm: Arc::new(Semaphore::new(llm.max(1))),
            remote_read: Arc::new(Semaphore::new(remote_read.max(1))),
            remote_write: Arc::new(Semaphore::new(remote_write)),
            compile: Arc::new(Semaphore::new(compile.max(1))),
        }
    }

    async fn acquire(
        sem: &Arc<Semaphore>,
        slot: &'static str,
        timeout: Duration,
    ) -> Result<OwnedSemaphorePermit, SlotTimeout> {
        match tokio::time::timeout(timeout, sem.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            // acquire_owned only errors when the semaphore is closed, which
            // never happens here; treat it like a timeout
            Ok(Err(_)) | Err(_) => {
                debug!(slot, ?timeout, "slot acquisition timed out");
                Err(SlotTimeout { slot, timeout })
            }
        }
    }

    pub async fn acquire_llm(&self, timeout: Duration) -> Result<OwnedSemaphorePermit, SlotTimeout> {
        Self::acquire(&self.llm, "llm", timeout).await
    }

    pub async fn acquire_remote_read(&self, timeout: Duration) -> Result<OwnedSemaphorePermit, SlotTimeout> {
        Self::acquire(&self.remote_read, "remote-read", timeout).await
    }

    pub async fn acquire_remote_write(&self, timeout: Duration) -> Result<OwnedSemaphorePermit, SlotTimeout> {
        Self::acquire(&self.remote_write, "remote-write", timeout).await
    }

    pub async fn acquire_compile(&self, timeout: Duration) -> Result<OwnedSemaphorePermit, SlotTimeout> {
        Self::acquire(&self.compile, "compile", timeout).await
    }
}

impl Default for SemaphorePool {
    fn default() -> Self {
        SemaphorePool::new(2, 2, 1, 1)
    }
}

/// External cancellation probe injected by the task service
pub type CancelCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// A single cancelled flag, cheap to clone and probe
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    external: Option<CancelCheck>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    /// Attach an outside check (service shutdown, task deletion); the token
    /// reports cancelled when either source fires
    pub fn with_external(mut self, check: CancelCheck) -> Self {
        self.external = Some(check);
        self
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        self.external.as_ref().is_some_and(|check| check())
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.flag.load(Ordering::SeqCst))
            .field("has_external", &self.external.is_some())
            .finish()
    }
}

/// Probe period for interruptible waits
const SLEEP_PROBE: Duration = Duration::from_millis(100);

/// Sleep up to `duration`, returning `false` early if the token cancels
pub async fn interruptible_sleep(duration: Duration, token: &CancelToken) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if token.is_cancelled() {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }
        tokio::time::sleep(remaining.min(SLEEP_PROBE)).await;
    }
}

/// `base ± spread`, uniformly distributed
pub fn jittered(base: Duration, spread: Duration) -> Duration {
    let spread_secs = spread.as_secs_f64();
    let offset = rand::rng().random_range(-spread_secs..=spread_secs);
    Duration::from_secs_f64((base.as_secs_f64() + offset).max(0.0))
}

/// Retry policy for [`retry_with_backoff`]
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff {
            attempts: 3,
            base: Duration::from_secs(2),
            cap: Duration::from_secs(60),
        }
    }
}

impl Backoff {
    /// Exponential delay before attempt `n` (1-based), capped
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        exp.min(self.cap)
    }
}

/// Run `op` until it succeeds, the error stops being retryable, or the
/// attempt budget is spent. The operation must be idempotent on observable
/// side effects.
pub async fn retry_with_backoff<T, E, F, Fut, R>(policy: Backoff, mut is_retryable: R, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(&E) -> bool,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.attempts && is_retryable(&err) => {
                let delay = policy.delay(attempt);
                debug!(attempt, ?delay, "retrying after error");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Process-global serializer for remote submissions
///
/// Concurrent solvers targeting the same judge family take this gate for the
/// whole submit + first-poll sequence; consecutive submits are additionally
/// spaced by `min_interval`.
pub struct SubmitGate {
    state: Mutex<SubmitState>,
    min_interval: Duration,
}

struct SubmitState {
    last_submit: Option<Instant>,
}

/// Exclusive hold on the gate; keep it alive across submit and the first poll
pub struct SubmitPermit<'a> {
    guard: MutexGuard<'a, SubmitState>,
}

impl SubmitPermit<'_> {
    /// Record the moment the submit RPC actually went out
    pub fn mark_submitted(&mut self) {
        self.guard.last_submit = Some(Instant::now());
    }
}

impl SubmitGate {
    pub fn new(min_interval: Duration) -> Self {
        SubmitGate {
            state: Mutex::new(SubmitState { last_submit: None }),
            min_interval,
        }
    }

    /// Wait for exclusivity and for the minimum spacing since the last submit
    pub async fn acquire(&self) -> SubmitPermit<'_> {
        let mut guard = self.state.lock().await;
        if let Some(last) = guard.last_submit {
            let since = last.elapsed();
            if since < self.min_interval {
                tokio::time::sleep(self.min_interval - since).await;
            }
        }
        guard.last_submit = Some(Instant::now());
        SubmitPermit { guard }
    }
}

impl Default for SubmitGate {
    fn default() -> Self {
        SubmitGate::new(Duration::from_secs(1))
    }
}
