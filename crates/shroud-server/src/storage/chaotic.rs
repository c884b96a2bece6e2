//! Chaotic store wrapper for fault injection testing
//!
//! Randomly fails operations so tests can check that session and routing
//! logic either completes or surfaces `TransientStore`, and never leaves the
//! store half-written in a way that breaks resolution.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use super::{ExpiringStore, StorageError, Versioned};

/// Chaotic store wrapper that randomly injects failures
///
/// Delegates to an underlying store but fails operations based on a
/// configured failure rate. Injected failures happen before the inner call,
/// so a failed write never lands.
#[derive(Clone)]
pub struct ChaoticStore<S: ExpiringStore> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
    /// Operation counter
    operation_count: Arc<Mutex<usize>>,
    /// Injected failure counter
    failure_count: Arc<Mutex<usize>>,
}

/// Linear congruential generator: fast, deterministic, reproducible by seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // Numerical Recipes constants
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }

    fn should_fail(&mut self, failure_rate: f64) -> bool {
        self.next() < failure_rate
    }
}

impl<S: ExpiringStore> ChaoticStore<S> {
    /// Create a new chaotic wrapper with the default seed
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(Mutex::new(0)),
            failure_count: Arc::new(Mutex::new(0)),
        }
    }

    /// Underlying store (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of operations attempted.
    pub fn operation_count(&self) -> usize {
        #[allow(clippy::expect_used)]
        *self.operation_count.lock().expect("operation_count mutex poisoned")
    }

    /// Number of operations that were failed on purpose.
    pub fn failure_count(&self) -> usize {
        #[allow(clippy::expect_used)]
        *self.failure_count.lock().expect("failure_count mutex poisoned")
    }

    /// Count the operation and decide whether to fail it.
    fn inject(&self) -> Result<(), StorageError> {
        #[allow(clippy::expect_used)]
        {
            *self.operation_count.lock().expect("operation_count mutex poisoned") += 1;

            let fail =
                self.rng.lock().expect("ChaoticRng mutex poisoned").should_fail(self.failure_rate);
            if fail {
                *self.failure_count.lock().expect("failure_count mutex poisoned") += 1;
                return Err(StorageError::Io("chaotic failure injection".to_string()));
            }
        }
        Ok(())
    }
}

impl<S: ExpiringStore> ExpiringStore for ChaoticStore<S> {
    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<u64, StorageError> {
        self.inject()?;
        self.inner.set(key, value, ttl)
    }

    fn get(&self, key: &str) -> Result<Option<Versioned>, StorageError> {
        self.inject()?;
        self.inner.get(key)
    }

    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<u64>,
        value: &[u8],
        ttl: Duration,
    ) -> Result<u64, StorageError> {
        self.inject()?;
        self.inner.compare_and_set(key, expected, value, ttl)
    }

    fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.inject()?;
        self.inner.delete(key)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.inject()?;
        self.inner.scan_prefix(prefix)
    }

    fn delete_many(&self, keys: &[String]) -> Result<usize, StorageError> {
        self.inject()?;
        self.inner.delete_many(keys)
    }

    fn ttl(&self, key: &str) -> Result<Option<Duration>, StorageError> {
        self.inject()?;
        self.inner.ttl(key)
    }
}
