//! Production environment: tokio time and the thread-local RNG.

use std::{
    future::Future,
    time::{Duration, Instant},
};

use maekawa_core::Environment;
use rand::RngCore;

/// Real wall-clock time and OS-seeded randomness.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        rand::thread_rng().fill_bytes(buffer);
    }
}
