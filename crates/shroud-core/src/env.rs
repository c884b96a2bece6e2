//! Clock and entropy seam.
//!
//! Session and routing logic reads time and randomness only through
//! [`Environment`]. The server binary plugs in the system clock and OS
//! entropy; the simulation harness plugs in a virtual clock and a seeded
//! RNG, so a 24 hour expiry is tested by advancing the clock.

use std::{future::Future, ops::Sub, time::Duration};

/// Time and randomness as seen by session and routing logic.
///
/// # Contract
///
/// - `now()` and `wall_clock_ms()` are monotonic and advance together
/// - `random_bytes()` is backed by a CSPRNG outside of simulation
/// - Nothing here fails in normal operation; an entropy failure is fatal
pub trait Environment: Clone + Send + Sync + 'static {
    /// Monotonic instant. `std::time::Instant` in production, a virtual
    /// offset in simulation.
    type Instant: Copy + Ord + Send + Sync + Sub<Output = Duration>;

    /// Monotonic now.
    fn now(&self) -> Self::Instant;

    /// Milliseconds since the Unix epoch.
    ///
    /// Every persisted timestamp and every store expiry is expressed in
    /// this clock.
    fn wall_clock_ms(&self) -> u64;

    /// Wait for `duration`.
    ///
    /// Reserved for drivers: retry backoff and the periodic sweeps.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Fill `buffer` with random bytes. Reproducible per seed in simulation.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// `N` random bytes, e.g. the body of a session or message id.
    fn random_array<const N: usize>(&self) -> [u8; N] {
        let mut bytes = [0u8; N];
        self.random_bytes(&mut bytes);
        bytes
    }
}
