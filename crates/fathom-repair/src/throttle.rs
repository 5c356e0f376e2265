//! Token bucket rate limiter for background copies.
//!
//! [`Throttle`] caps how many objects rebalancing moves per second so that
//! migrations do not starve client traffic. Each token is one copy.

use tokio::time::{Duration, Instant};
use tracing::debug;

/// Token bucket limiting operations per second.
///
/// The bucket holds at most one second's worth of tokens and starts full.
/// A rate of zero disables limiting.
pub struct Throttle {
    per_sec: u32,
    state: tokio::sync::Mutex<BucketState>,
}

struct BucketState {
    available: f64,
    last_refill: Instant,
    rate: f64,
}

impl BucketState {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.available = (self.available + elapsed * self.rate).min(self.rate);
            self.last_refill = now;
        }
    }
}

impl Throttle {
    /// Create a throttle allowing `per_sec` operations per second.
    pub fn new(per_sec: u32) -> Self {
        let rate = f64::from(per_sec);
        Self {
            per_sec,
            state: tokio::sync::Mutex::new(BucketState {
                available: rate,
                last_refill: Instant::now(),
                rate,
            }),
        }
    }

    /// Wait for one token and consume it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                if state.rate <= 0.0 {
                    return;
                }
                state.refill();
                if state.available >= 1.0 {
                    state.available -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.available) / state.rate)
            };

            debug!(wait_ms = wait.as_millis(), "throttle: waiting for token");
            tokio::time::sleep(wait).await;
        }
    }

    /// Configured operations per second.
    pub fn rate(&self) -> u32 {
        self.per_sec
    }
}

impl std::fmt::Debug for Throttle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle")
            .field("per_sec", &self.rate())
            .finish()
    }
}
