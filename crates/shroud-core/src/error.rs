//! Caller-visible error taxonomy.
//!
//! Every operation of the session manager, router and crypto engine fails
//! with a [`ShroudError`]. The transport layer never renders it directly; it
//! calls [`ShroudError::public`] and sends the resulting [`PublicError`],
//! which names a category and a fixed hint and nothing else.

use std::fmt;

use serde::{Deserialize, Serialize};
use shroud_crypto::CryptoError;
use thiserror::Error;

/// Kind of resource a lookup failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Anonymous session (by primary or secondary id)
    Session,
    /// Persisted message record
    Message,
    /// Anonymous channel
    Channel,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Session => "session",
            Self::Message => "message",
            Self::Channel => "channel",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by Shroud operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShroudError {
    /// Id is unknown, expired, or a retired secondary id
    #[error("{kind} not found")]
    NotFound {
        /// What was being looked up
        kind: ResourceKind,
    },

    /// Request input failed validation
    #[error("invalid {field}: {reason}")]
    Validation {
        /// Offending input
        field: &'static str,
        /// What was wrong with it
        reason: String,
    },

    /// A record carried a field that could identify the sender
    #[error("identifying metadata in field {field}")]
    LeakageDetected {
        /// Name of the offending field
        field: String,
    },

    /// Ciphertext failed authentication (tampering or wrong key)
    #[error("authentication failed")]
    AuthenticationFailure,

    /// Key material required for the operation does not exist
    #[error("keys not ready: {reason}")]
    KeysNotReady {
        /// Which key material is missing
        reason: &'static str,
    },

    /// Store stayed unavailable after every retry
    #[error("store unavailable after {attempts} attempts: {last_error}")]
    TransientStore {
        /// Attempts made before giving up
        attempts: u32,
        /// Last underlying error
        last_error: String,
    },

    /// Payload larger than the configured limit
    #[error("payload of {size} bytes exceeds limit of {limit} bytes")]
    CapacityExceeded {
        /// Size of the rejected payload
        size: u64,
        /// Configured limit
        limit: u64,
    },

    /// Channel fan-out reached nobody
    #[error("no recipient received the message")]
    NoRecipients,
}

impl ShroudError {
    /// Returns true if this error is transient and may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientStore { .. })
    }

    /// Returns true if this error is a security event.
    ///
    /// Security events are logged on the `shroud::security` target and the
    /// offending input is dropped.
    pub fn is_security_event(&self) -> bool {
        matches!(self, Self::LeakageDetected { .. } | Self::AuthenticationFailure)
    }

    /// Category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Validation { .. } => ErrorCategory::InvalidRequest,
            Self::LeakageDetected { .. } => ErrorCategory::Rejected,
            Self::AuthenticationFailure => ErrorCategory::Tampered,
            Self::KeysNotReady { .. } => ErrorCategory::KeysNotReady,
            Self::TransientStore { .. } => ErrorCategory::Unavailable,
            Self::CapacityExceeded { .. } => ErrorCategory::TooLarge,
            Self::NoRecipients => ErrorCategory::Undeliverable,
        }
    }

    /// Sanitized form for clients.
    ///
    /// Never includes field names, store errors or crypto diagnostics.
    pub fn public(&self) -> PublicError {
        let category = self.category();
        PublicError { category, hint: category.hint() }
    }
}

/// Coarse error category exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Unknown or expired identifier
    NotFound,
    /// Malformed input
    InvalidRequest,
    /// Record refused by the metadata scan
    Rejected,
    /// Ciphertext failed authentication
    Tampered,
    /// Client must (re)derive keys
    KeysNotReady,
    /// Try again later
    Unavailable,
    /// Payload too large
    TooLarge,
    /// Nobody received the message
    Undeliverable,
}

impl ErrorCategory {
    /// Fixed hint text for the category.
    pub fn hint(self) -> &'static str {
        match self {
            Self::NotFound => "session or resource not found; create a new session",
            Self::InvalidRequest => "request failed validation",
            Self::Rejected => "message contains disallowed metadata",
            Self::Tampered => "message could not be authenticated",
            Self::KeysNotReady => "derive a shared secret for this chat first",
            Self::Unavailable => "temporarily unavailable; retry later",
            Self::TooLarge => "payload exceeds the size limit",
            Self::Undeliverable => "no recipient could be reached",
        }
    }
}

/// Error body returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicError {
    /// Error category
    pub category: ErrorCategory,
    /// Short human-readable hint
    pub hint: &'static str,
}

impl From<CryptoError> for ShroudError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::KeysNotReady { reason } => Self::KeysNotReady { reason },
            CryptoError::UsageExhausted { .. } => {
                Self::KeysNotReady { reason: "key usage exhausted, derive a new shared secret" }
            },
            CryptoError::Entropy(_) => Self::KeysNotReady { reason: "entropy unavailable" },
            CryptoError::AuthenticationFailure | CryptoError::MalformedEnvelope { .. } => {
                Self::AuthenticationFailure
            },
            CryptoError::InvalidKey { reason } => Self::Validation { field: "publicKey", reason },
            CryptoError::CapacityExceeded { size, limit } => Self::CapacityExceeded { size, limit },
            CryptoError::FileComplete => {
                Self::Validation { field: "file", reason: "file already complete".to_string() }
            },
        }
    }
}
