//! Channel fan-out delivery.
//!
//! The router hands each channel recipient's copy of an envelope to a
//! [`Delivery`] implementation. The transport behind it (push queue,
//! long-poll mailbox, socket) is outside this crate; [`MemoryMailbox`] keeps
//! deliveries in memory.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use thiserror::Error;

/// Delivery failure for one recipient.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Recipient temporarily unreachable; worth retrying
    #[error("recipient unreachable: {0}")]
    Unreachable(String),

    /// Recipient refused the envelope; retrying will not help
    #[error("delivery rejected: {0}")]
    Rejected(String),
}

impl DeliveryError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

/// Per-recipient envelope delivery.
///
/// Same shape as the stores: Clone, Send + Sync, synchronous.
pub trait Delivery: Clone + Send + Sync + 'static {
    /// Enqueue `envelope` for `recipient` (a primary session id) on behalf of
    /// `channel_id`.
    fn deliver(&self, recipient: &str, channel_id: &str, envelope: &str) -> Result<(), DeliveryError>;
}

/// An envelope waiting in a mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredEnvelope {
    /// Channel the envelope was sent through
    pub channel_id: String,
    /// Opaque envelope in transport encoding
    pub envelope: String,
}

/// In-memory mailboxes keyed by recipient.
///
/// Uses `lock().expect()` which will panic if the mutex is poisoned.
#[derive(Clone, Default)]
pub struct MemoryMailbox {
    inner: Arc<Mutex<HashMap<String, Vec<DeliveredEnvelope>>>>,
}

impl MemoryMailbox {
    /// Create empty mailboxes
    pub fn new() -> Self {
        Self::default()
    }

    /// Envelopes delivered to `recipient`, oldest first.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn messages_for(&self, recipient: &str) -> Vec<DeliveredEnvelope> {
        self.inner.lock().expect("Mutex poisoned").get(recipient).cloned().unwrap_or_default()
    }

    /// Total envelopes across all mailboxes.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn total(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").values().map(Vec::len).sum()
    }
}

impl Delivery for MemoryMailbox {
    #[allow(clippy::expect_used)]
    fn deliver(&self, recipient: &str, channel_id: &str, envelope: &str) -> Result<(), DeliveryError> {
        self.inner.lock().expect("Mutex poisoned").entry(recipient.to_string()).or_default().push(
            DeliveredEnvelope { channel_id: channel_id.to_string(), envelope: envelope.to_string() },
        );
        Ok(())
    }
}
