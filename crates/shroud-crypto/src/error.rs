//! Error types for the cryptographic engine

use thiserror::Error;

/// Errors from engine and primitive operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Operation attempted before the required key material exists.
    ///
    /// Either the engine was never initialized, or no shared secret has been
    /// derived for the chat (or it was discarded by a key rotation).
    #[error("keys not ready: {reason}")]
    KeysNotReady {
        /// Which key material is missing
        reason: &'static str,
    },

    /// Authentication tag mismatch (tampering, corruption or wrong key)
    #[error("authentication failed")]
    AuthenticationFailure,

    /// Envelope bytes could not be parsed
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope {
        /// What was wrong with the input
        reason: String,
    },

    /// Public key or signature bytes are unusable
    #[error("invalid key material: {reason}")]
    InvalidKey {
        /// What was wrong with the key
        reason: String,
    },

    /// Payload larger than the configured limit
    #[error("payload of {size} bytes exceeds limit of {limit} bytes")]
    CapacityExceeded {
        /// Size of the rejected payload
        size: u64,
        /// Configured limit
        limit: u64,
    },

    /// The per-secret usage counter ran out. The chat must be re-keyed.
    #[error("key usage exhausted after {uses} operations")]
    UsageExhausted {
        /// Number of operations performed under the secret
        uses: u64,
    },

    /// Chunk submitted to a file that was already sealed completely
    #[error("file already complete")]
    FileComplete,

    /// OS entropy source failed
    #[error("entropy unavailable: {0}")]
    Entropy(String),
}

impl CryptoError {
    /// Returns true if this error indicates tampering or corruption of
    /// received data.
    ///
    /// These are security events: callers log them and drop the input.
    pub fn is_tamper(&self) -> bool {
        matches!(self, Self::AuthenticationFailure | Self::MalformedEnvelope { .. })
    }
}
