//! Environment abstraction.
//!
//! The node driver needs wall-clock sleeps and randomness for think times.
//! Both come from an [`Environment`] so the same driver runs against real
//! time in production and virtual, seeded time in simulation.

use std::{
    future::Future,
    time::{Duration, Instant},
};

/// Source of time and randomness.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current time.
    fn now(&self) -> Instant;

    /// Sleep for `duration`.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Fill `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Uniform random duration in `[min, max]`.
    ///
    /// Returns `min` when the range is empty.
    fn random_duration(&self, min: Duration, max: Duration) -> Duration {
        if max <= min {
            return min;
        }

        let span = u64::try_from((max - min).as_nanos()).unwrap_or(u64::MAX);
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        let raw = u64::from_le_bytes(bytes);
        let offset = if span == u64::MAX { raw } else { raw % (span + 1) };

        min + Duration::from_nanos(offset)
    }
}
