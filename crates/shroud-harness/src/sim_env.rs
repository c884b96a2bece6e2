//! Virtual-clock Environment implementation for deterministic testing.

#![allow(clippy::disallowed_types, reason = "Synchronous state behind a short-lived lock")]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use shroud_core::Environment;

/// Wall-clock time at which every simulation starts (2023-11-14).
pub const SIM_EPOCH_MS: u64 = 1_700_000_000_000;

/// Simulation environment with a virtual clock and seeded RNG.
///
/// - **Virtual time**: the clock only moves through [`SimEnv::advance`] or
///   [`Environment::sleep`]. A sleep advances the clock by its full duration
///   and yields once, so backoff and sweep intervals cost no real time.
/// - **Seeded RNG**: `random_bytes()` draws from a `ChaCha20Rng`, so ids and
///   salts repeat across runs with the same seed.
///
/// Clones share the clock and the RNG.
#[derive(Clone)]
pub struct SimEnv {
    state: Arc<Mutex<SimState>>,
}

struct SimState {
    elapsed: Duration,
    rng: ChaCha20Rng,
}

impl SimEnv {
    /// Create a new SimEnv with default seed (0)
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Create a new SimEnv with a specific seed
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                elapsed: Duration::ZERO,
                rng: ChaCha20Rng::seed_from_u64(seed),
            })),
        }
    }

    /// Move the clock forward.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn advance(&self, duration: Duration) {
        let mut state = self.state.lock().expect("Mutex poisoned");
        state.elapsed = state.elapsed.saturating_add(duration);
    }

    /// Virtual time since the simulation started.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn elapsed(&self) -> Duration {
        self.state.lock().expect("Mutex poisoned").elapsed
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    type Instant = Duration;

    fn now(&self) -> Self::Instant {
        self.elapsed()
    }

    fn wall_clock_ms(&self) -> u64 {
        SIM_EPOCH_MS.saturating_add(u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX))
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        tokio::task::yield_now()
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        self.state.lock().expect("Mutex poisoned").rng.fill_bytes(buffer);
    }
}
