//! Entropy source abstraction
//!
//! Primitives in this crate are pure; the engine pulls randomness through
//! [`EntropySource`] so tests can substitute a deterministic source.

use crate::error::CryptoError;

/// Source of cryptographically secure random bytes.
///
/// # Invariants
///
/// Production implementations MUST return OS-grade entropy. A failure is
/// reported, never papered over with weaker randomness.
pub trait EntropySource: Send + Sync {
    /// Fills the buffer with random bytes.
    fn fill(&self, buffer: &mut [u8]) -> Result<(), CryptoError>;

    /// Random fixed-size array.
    fn array<const N: usize>(&self) -> Result<[u8; N], CryptoError>
    where
        Self: Sized,
    {
        let mut bytes = [0u8; N];
        self.fill(&mut bytes)?;
        Ok(bytes)
    }
}

/// Operating system RNG (getrandom).
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, buffer: &mut [u8]) -> Result<(), CryptoError> {
        getrandom::fill(buffer).map_err(|e| CryptoError::Entropy(e.to_string()))
    }
}
