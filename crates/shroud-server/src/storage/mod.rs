//! Storage abstraction for Shroud
//!
//! Two stores sit behind traits:
//!
//! - [`ExpiringStore`]: versioned key-value entries with a TTL. Holds
//!   sessions, identifier mappings, rotation audits, routing buckets and
//!   channels. It is the single source of truth; nothing in process memory is
//!   authoritative.
//! - [`MessageStore`]: persisted message records (opaque ciphertext plus
//!   metadata).
//!
//! Both traits are synchronous. Retries and backoff live one level up, in
//! [`crate::retry`].

mod chaotic;
mod error;
mod memory;
mod message;

use std::time::Duration;

pub use chaotic::ChaoticStore;
pub use error::StorageError;
pub use memory::MemoryStore;
pub use message::{MemoryMessageStore, MessageStore, StoredMessage};
use serde::{Serialize, de::DeserializeOwned};

/// A live entry and its version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    /// Stored bytes
    pub value: Vec<u8>,
    /// Version assigned on the last write
    ///
    /// Versions are never reused for a key, even across delete and re-create.
    pub version: u64,
}

/// Key-value store with per-entry expiry and compare-and-set.
///
/// Must be Clone (shared by the session manager, router and sweeps), Send +
/// Sync, and synchronous. Implementations share internal state via Arc, so
/// clones access the same underlying store.
///
/// Expired entries are indistinguishable from absent ones.
pub trait ExpiringStore: Clone + Send + Sync + 'static {
    /// Unconditionally write `value` under `key` for `ttl`.
    ///
    /// Returns the new version.
    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<u64, StorageError>;

    /// Read a live entry.
    fn get(&self, key: &str) -> Result<Option<Versioned>, StorageError>;

    /// Write only if the current version equals `expected`.
    ///
    /// `expected == None` means create-only: the write succeeds only if no
    /// live entry exists.
    ///
    /// # Errors
    ///
    /// - `Conflict`: the stored version differs from `expected`
    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<u64>,
        value: &[u8],
        ttl: Duration,
    ) -> Result<u64, StorageError>;

    /// Delete an entry. Returns whether a live entry was removed.
    fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Keys of all live entries starting with `prefix`. Order is not
    /// guaranteed.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Delete several entries in one batch. Returns how many live entries
    /// were removed.
    fn delete_many(&self, keys: &[String]) -> Result<usize, StorageError>;

    /// Remaining time to live. `None` if the key is absent.
    fn ttl(&self, key: &str) -> Result<Option<Duration>, StorageError>;
}

/// Encode a value for the expiring store (CBOR).
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)?;
    Ok(bytes)
}

/// Decode a value read from the expiring store.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    Ok(ciborium::from_reader(bytes)?)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u64,
    }

    #[test]
    fn cbor_codec_roundtrip() {
        let sample = Sample { name: "bucket".to_string(), count: 7 };
        let decoded: Sample = decode(&encode(&sample).unwrap()).unwrap();
        assert_eq!(decoded, sample);
    }

    #[test]
    fn decode_garbage_is_serialization_error() {
        let result: Result<Sample, _> = decode(&[0xFF, 0x00, 0x13]);
        assert!(matches!(result, Err(StorageError::Serialization(_))));
    }
}
