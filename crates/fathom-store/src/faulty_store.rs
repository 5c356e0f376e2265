//! An [`ObjectStore`] wrapper that injects latency and outages.
//!
//! `FaultyStore` wraps any `Arc<dyn ObjectStore>` and sleeps for a random
//! duration before each read or write. It can also be switched offline, in
//! which case every call fails with [`StoreError::Unavailable`]. The RNG is
//! seeded for reproducible behaviour across test runs.
//!
//! # Example
//!
//! ```ignore
//! let faulty = FaultyStore::new(inner)
//!     .read_latency(5, 20)    // 5 to 20 ms per read
//!     .write_latency(10, 30)  // 10 to 30 ms per write
//!     .seed(42);
//! faulty.set_offline(true);
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::StoreError;
use crate::traits::{ObjectStore, StorageCapacity};

/// Latency and outage injection around another store.
pub struct FaultyStore {
    inner: Arc<dyn ObjectStore>,
    name: String,
    read_latency_ms: (u64, u64),
    write_latency_ms: (u64, u64),
    rng: Mutex<StdRng>,
    offline: AtomicBool,
    fail_writes: AtomicBool,
    put_attempts: AtomicUsize,
}

impl FaultyStore {
    /// Wrap an existing store with zero latency (pass-through) by default.
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner,
            name: "faulty".to_string(),
            read_latency_ms: (0, 0),
            write_latency_ms: (0, 0),
            rng: Mutex::new(StdRng::seed_from_u64(0)),
            offline: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            put_attempts: AtomicUsize::new(0),
        }
    }

    /// Name used in error messages.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the read latency range in milliseconds (uniform random).
    pub fn read_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.read_latency_ms = (min_ms, max_ms);
        self
    }

    /// Set the write latency range in milliseconds (uniform random).
    pub fn write_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.write_latency_ms = (min_ms, max_ms);
        self
    }

    /// Set the RNG seed for deterministic behaviour.
    pub fn seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// Make every call fail (`true`) or pass through again (`false`).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make `put` fail while reads keep working.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Whether the store is switched offline.
    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Number of `put` calls received, successful or not.
    pub fn put_attempts(&self) -> usize {
        self.put_attempts.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.is_offline() {
            return Err(StoreError::Unavailable(self.name.clone()));
        }
        Ok(())
    }

    /// Sleep for a random duration in `[min, max]` milliseconds.
    async fn delay(&self, range: (u64, u64)) {
        let (min, max) = range;
        if max == 0 {
            return;
        }

        let ms = if min >= max {
            max
        } else {
            self.rng
                .lock()
                .expect("rng lock poisoned")
                .random_range(min..=max)
        };

        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for FaultyStore {
    async fn ensure_container(&self, container: &str) -> Result<(), StoreError> {
        self.check_online()?;
        self.inner.ensure_container(container).await
    }

    async fn put(&self, container: &str, key: &str, data: Bytes) -> Result<(), StoreError> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        self.delay(self.write_latency_ms).await;
        self.check_online()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other(format!(
                "{}: injected write failure",
                self.name
            ))));
        }
        self.inner.put(container, key, data).await
    }

    async fn get(&self, container: &str, key: &str) -> Result<Option<Bytes>, StoreError> {
        self.delay(self.read_latency_ms).await;
        self.check_online()?;
        self.inner.get(container, key).await
    }

    async fn head(&self, container: &str, key: &str) -> Result<Option<u64>, StoreError> {
        self.delay(self.read_latency_ms).await;
        self.check_online()?;
        self.inner.head(container, key).await
    }

    async fn delete(&self, container: &str, key: &str) -> Result<(), StoreError> {
        self.delay(self.write_latency_ms).await;
        self.check_online()?;
        self.inner.delete(container, key).await
    }

    async fn list(&self, container: &str) -> Result<Vec<String>, StoreError> {
        self.check_online()?;
        self.inner.list(container).await
    }

    async fn presign(
        &self,
        container: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, StoreError> {
        self.check_online()?;
        self.inner.presign(container, key, ttl).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.check_online()?;
        self.inner.health_check().await
    }

    async fn capacity(&self) -> Result<StorageCapacity, StoreError> {
        self.check_online()?;
        self.inner.capacity().await
    }
}
