//! Core environment context traits for harness components.

use async_trait::async_trait;
use std::time::{Duration, SystemTime};

/// Time source used for telemetry timings and record timestamps.
///
/// Split out of [`HarnessContext`] so it can be shared as `Arc<dyn Clock>`.
pub trait Clock: Send + Sync {
    /// Returns the current monotonic time since context creation.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time used for record timestamps.
    fn system_time(&self) -> SystemTime;
}

/// Time as seen by the product surface.
///
/// Page loads and render delays are measured against this context, so a
/// simulated surface can run on a virtual clock (`SimContext`) while a real
/// one waits on the system clock.
#[async_trait]
pub trait HarnessContext: Clock + 'static {
    /// Suspends execution for the given duration.
    ///
    /// In simulation this advances the virtual clock.
    async fn sleep(&self, duration: Duration);
}
