//! Storage error types.
//!
//! - `Conflict`: compare-and-set lost against a concurrent writer
//! - `Serialization`: stored bytes could not be encoded/decoded
//! - `Io`: backend failure, worth retrying
//! - `Unavailable`: backend still failing after the retry policy gave up

use shroud_core::ShroudError;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Entry version did not match the expected version
    ///
    /// Create-only writes (`expected == None`) fail with this when the key
    /// already holds a live entry.
    #[error("write conflict on {key}: expected version {expected:?}, found {actual:?}")]
    Conflict {
        /// Key that was written
        key: String,
        /// Version the writer expected
        expected: Option<u64>,
        /// Version actually stored
        actual: Option<u64>,
    },

    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backend I/O error (network, disk, etc.)
    #[error("I/O error: {0}")]
    Io(String),

    /// Retries exhausted
    #[error("store unavailable after {attempts} attempts: {last_error}")]
    Unavailable {
        /// Attempts made
        attempts: u32,
        /// Last underlying error
        last_error: String,
    },
}

impl StorageError {
    /// Returns true if the operation may succeed on retry.
    ///
    /// Conflicts are not transient here: the caller must re-read before
    /// writing again, which a blind retry would skip.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// Returns true if this is a compare-and-set conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<ciborium::de::Error<std::io::Error>> for StorageError {
    fn from(err: ciborium::de::Error<std::io::Error>) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for StorageError {
    fn from(err: ciborium::ser::Error<std::io::Error>) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Store failures reach callers as `TransientStore`; the detail stays in
/// the server log.
impl From<StorageError> for ShroudError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unavailable { attempts, last_error } => {
                Self::TransientStore { attempts, last_error }
            },
            other => Self::TransientStore { attempts: 1, last_error: other.to_string() },
        }
    }
}
