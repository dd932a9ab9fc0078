//! Execution-window grants.
//!
//! Some hosts suspend background work after a limited budget. A reporting
//! cycle holds a grant from the host while it delivers, so normal suspension
//! rules do not interrupt it. Grants are best effort: the host may expire one
//! early, and delivery then carries on if the host still schedules it.
//!
//! The host side is the [`ExecutionHost`] capability. [`ExecutionGuard`]
//! wraps it and hands out [`GrantHandle`]s whose release is idempotent and
//! safe to race against host-driven expiry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

/// Opaque identifier of a grant issued by an [`ExecutionHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GrantToken(u64);

impl GrantToken {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

/// Callback a host invokes when it expires a grant early.
pub type ExpiryHandler = Box<dyn FnOnce() + Send + 'static>;

/// Host API for extended-execution grants.
///
/// `begin` may invoke `on_expire` at any later time, from any thread, until
/// `end` is called for the same token. `end` is called exactly once per
/// `begin`.
pub trait ExecutionHost: Send + Sync + 'static {
    /// Request a grant named `label`.
    fn begin(&self, label: &str, on_expire: ExpiryHandler) -> GrantToken;

    /// Give the grant back.
    fn end(&self, token: GrantToken);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Issues grants through an [`ExecutionHost`].
#[derive(Clone)]
pub struct ExecutionGuard {
    host: Arc<dyn ExecutionHost>,
}

impl ExecutionGuard {
    pub fn new(host: Arc<dyn ExecutionHost>) -> Self {
        Self { host }
    }

    /// Acquire a grant named `label`.
    ///
    /// The returned handle is released by [`GrantHandle::release`], by drop,
    /// or by the host expiring it, whichever happens first.
    pub fn acquire(&self, label: &str) -> GrantHandle {
        let grant = Arc::new(ExecutionGrant {
            active: AtomicBool::new(true),
            token: Mutex::new(None),
            label: label.to_owned(),
            host: Arc::clone(&self.host),
        });

        let expiring = Arc::clone(&grant);
        let token = self.host.begin(
            label,
            Box::new(move || {
                if expiring.release() {
                    tracing::warn!(label = %expiring.label, "Execution grant expired by host");
                }
            }),
        );

        {
            // Expiry may already have fired inside `begin`; the token check
            // happens under the lock that `release` takes its token from.
            let mut slot = lock(&grant.token);
            if grant.active.load(Ordering::Acquire) {
                *slot = Some(token);
            } else {
                drop(slot);
                self.host.end(token);
            }
        }

        tracing::debug!(label, token = token.get(), "Execution grant acquired");
        GrantHandle { grant }
    }
}

impl std::fmt::Debug for ExecutionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionGuard").finish_non_exhaustive()
    }
}

/// Shared state of one live grant.
struct ExecutionGrant {
    active: AtomicBool,
    token: Mutex<Option<GrantToken>>,
    label: String,
    host: Arc<dyn ExecutionHost>,
}

impl ExecutionGrant {
    /// Returns `true` only for the call that actually released the grant.
    fn release(&self) -> bool {
        if self
            .active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let token = lock(&self.token).take();
        if let Some(token) = token {
            self.host.end(token);
        }
        true
    }
}

/// Caller's handle on a grant.
pub struct GrantHandle {
    grant: Arc<ExecutionGrant>,
}

impl GrantHandle {
    /// Whether the grant is still held. Turns `false` after release or
    /// host expiry.
    pub fn is_active(&self) -> bool {
        self.grant.active.load(Ordering::Acquire)
    }

    pub fn label(&self) -> &str {
        &self.grant.label
    }

    /// Release the grant. Releasing twice, or after expiry, is a no-op.
    pub fn release(&self) {
        if self.grant.release() {
            tracing::debug!(label = %self.grant.label, "Execution grant released");
        }
    }
}

impl Drop for GrantHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for GrantHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantHandle")
            .field("label", &self.grant.label)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Host for processes that are never suspended. Grants never expire.
#[derive(Debug, Default)]
pub struct UnrestrictedHost {
    next_token: AtomicU64,
}

impl UnrestrictedHost {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionHost for UnrestrictedHost {
    fn begin(&self, _label: &str, _on_expire: ExpiryHandler) -> GrantToken {
        GrantToken(self.next_token.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn end(&self, _token: GrantToken) {}
}

/// Host with a fixed background-execution budget per grant.
///
/// Each grant expires `budget` after it was issued unless ended first.
/// Requires a running tokio runtime.
#[derive(Debug)]
pub struct TimeBoxedHost {
    budget: Duration,
    next_token: AtomicU64,
    timers: Arc<Mutex<HashMap<GrantToken, JoinHandle<()>>>>,
}

impl TimeBoxedHost {
    pub fn new(budget: Duration) -> Self {
        Self {
            budget,
            next_token: AtomicU64::new(0),
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Number of grants currently outstanding.
    pub fn live_grants(&self) -> usize {
        lock(&self.timers).len()
    }
}

impl ExecutionHost for TimeBoxedHost {
    fn begin(&self, label: &str, on_expire: ExpiryHandler) -> GrantToken {
        let token = GrantToken(self.next_token.fetch_add(1, Ordering::Relaxed) + 1);
        let budget = self.budget;
        let timers = Arc::clone(&self.timers);
        let label = label.to_owned();

        // Holding the lock across spawn keeps the timer from removing its
        // entry before it is inserted.
        let mut live = lock(&self.timers);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            let expired = lock(&timers).remove(&token).is_some();
            if expired {
                tracing::debug!(label = %label, budget_ms = budget.as_millis(), "Execution budget spent");
                on_expire();
            }
        });
        live.insert(token, timer);
        token
    }

    fn end(&self, token: GrantToken) {
        if let Some(timer) = lock(&self.timers).remove(&token) {
            timer.abort();
        }
    }
}
