//! Leased, non-blocking cluster locks.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

/// Proof of ownership returned by [`ClusterLock::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(u64);

/// Cluster-wide mutual exclusion with automatic lease expiry.
///
/// Acquisition never waits: a held lock means another instance is already
/// doing the work and the caller should skip it.
#[async_trait]
pub trait ClusterLock: Send + Sync {
    /// Take `key` for at most `lease`. `None` if someone else holds it.
    async fn try_acquire(&self, key: &str, lease: Duration) -> Option<LockToken>;

    /// Release `key` if `token` still owns it.
    async fn release(&self, key: &str, token: LockToken);
}

/// Single-process [`ClusterLock`].
#[derive(Debug, Default)]
pub struct MemoryLock {
    held: Mutex<HashMap<String, (LockToken, Instant)>>,
    next_token: AtomicU64,
}

impl MemoryLock {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is currently held by anyone.
    pub fn is_held(&self, key: &str) -> bool {
        let held = self.held.lock().expect("lock table poisoned");
        held.get(key)
            .is_some_and(|(_, expires)| *expires > Instant::now())
    }
}

#[async_trait]
impl ClusterLock for MemoryLock {
    async fn try_acquire(&self, key: &str, lease: Duration) -> Option<LockToken> {
        let now = Instant::now();
        let mut held = self.held.lock().expect("lock table poisoned");
        if let Some((_, expires)) = held.get(key)
            && *expires > now
        {
            debug!(key, "lock already held");
            return None;
        }
        let token = LockToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        held.insert(key.to_string(), (token, now + lease));
        debug!(key, ?lease, "lock acquired");
        Some(token)
    }

    async fn release(&self, key: &str, token: LockToken) {
        let mut held = self.held.lock().expect("lock table poisoned");
        if held.get(key).is_some_and(|(owner, _)| *owner == token) {
            held.remove(key);
            debug!(key, "lock released");
        }
    }
}
