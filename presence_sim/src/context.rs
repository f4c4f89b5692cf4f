//! Simulation context implementing HarnessContext for deterministic runs.

use async_trait::async_trait;
use presence_env::{Clock, HarnessContext};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Simulation context backed by deterministic time and RNG.
///
/// This implements `HarnessContext` using:
/// - A virtual clock that can be advanced manually
/// - A seeded ChaCha8 RNG for simulated latencies
/// - Simulated sleep that advances virtual time
///
/// Clones share the clock and the RNG.
#[derive(Clone)]
pub struct SimContext {
    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<Mutex<u64>>,

    /// Deterministic RNG
    rng: Arc<Mutex<ChaCha8Rng>>,

    /// Epoch offset (virtual time 0 maps to this wall-clock time)
    epoch: SystemTime,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            virtual_time_ns: Arc::new(Mutex::new(0)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            epoch: UNIX_EPOCH + Duration::from_secs(1_767_225_600), // 2026-01-01 00:00:00 UTC
        }
    }

    /// Maps virtual time 0 to `epoch` instead of the fixed default.
    pub fn with_epoch(mut self, epoch: SystemTime) -> Self {
        self.epoch = epoch;
        self
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        let mut time = lock(&self.virtual_time_ns);
        *time += duration.as_nanos() as u64;
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        *lock(&self.virtual_time_ns)
    }

    /// Uniform latency in `[min_ms, max_ms]`.
    pub fn latency(&self, min_ms: u64, max_ms: u64) -> Duration {
        if max_ms <= min_ms {
            return Duration::from_millis(min_ms);
        }
        Duration::from_millis(lock(&self.rng).gen_range(min_ms..=max_ms))
    }
}

impl Clock for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    fn system_time(&self) -> SystemTime {
        self.epoch + self.now()
    }
}

#[async_trait]
impl HarnessContext for SimContext {
    async fn sleep(&self, duration: Duration) {
        // Virtual time moves instantly; yield so sibling actors get scheduled.
        self.advance_time(duration);
        tokio::task::yield_now().await;
    }
}
