//! Delivery collaborator with scripted failures.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use shroud_server::{DeliveredEnvelope, Delivery, DeliveryError, MemoryMailbox};

/// Mailbox delivery that fails on request.
///
/// A recipient can be made unreachable for its next `n` attempts (transient)
/// or rejected outright (permanent). Every attempt is counted, successful or
/// not.
#[derive(Clone, Default)]
pub struct FlakyDelivery {
    mailbox: MemoryMailbox,
    state: Arc<Mutex<FlakyState>>,
}

#[derive(Default)]
struct FlakyState {
    fail_next: HashMap<String, u32>,
    rejected: HashSet<String>,
    attempts: HashMap<String, u32>,
}

impl FlakyDelivery {
    /// Create a delivery that never fails until told to
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` attempts to `recipient` as unreachable.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn fail_next(&self, recipient: &str, times: u32) {
        self.state.lock().expect("Mutex poisoned").fail_next.insert(recipient.to_string(), times);
    }

    /// Reject every attempt to `recipient`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn reject(&self, recipient: &str) {
        self.state.lock().expect("Mutex poisoned").rejected.insert(recipient.to_string());
    }

    /// Attempts made to `recipient` so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn attempts(&self, recipient: &str) -> u32 {
        self.state.lock().expect("Mutex poisoned").attempts.get(recipient).copied().unwrap_or(0)
    }

    /// Envelopes that reached `recipient`.
    pub fn delivered_to(&self, recipient: &str) -> Vec<DeliveredEnvelope> {
        self.mailbox.messages_for(recipient)
    }

    /// Envelopes delivered to anyone.
    pub fn total_delivered(&self) -> usize {
        self.mailbox.total()
    }
}

impl Delivery for FlakyDelivery {
    #[allow(clippy::expect_used)]
    fn deliver(&self, recipient: &str, channel_id: &str, envelope: &str) -> Result<(), DeliveryError> {
        {
            let mut state = self.state.lock().expect("Mutex poisoned");
            *state.attempts.entry(recipient.to_string()).or_default() += 1;

            if state.rejected.contains(recipient) {
                tracing::debug!("scripted rejection");
                return Err(DeliveryError::Rejected("scripted rejection".to_string()));
            }

            if let Some(remaining) = state.fail_next.get_mut(recipient).filter(|n| **n > 0) {
                *remaining -= 1;
                tracing::debug!(remaining = *remaining, "scripted unreachable");
                return Err(DeliveryError::Unreachable("scripted outage".to_string()));
            }
        }

        self.mailbox.deliver(recipient, channel_id, envelope)
    }
}
