//! Fully wired server on simulated time.
//!
//! `SimServer` wires a [`Shroud`] over a shared [`MemoryStore`], a
//! [`MemoryMessageStore`] and a [`FlakyDelivery`], all driven by one
//! [`SimEnv`]. Tests reach through the public fields to inspect or tamper
//! with the stores directly.

use std::time::Duration;

use shroud_server::{Backends, MemoryMessageStore, MemoryStore, ServerConfig, Shroud};

use crate::{FlakyDelivery, SimEnv};

/// The server type `SimServer` wires up.
pub type SimShroud = Shroud<SimEnv, MemoryStore<SimEnv>, MemoryMessageStore, FlakyDelivery>;

/// Simulation server for integration tests.
pub struct SimServer {
    /// Shared clock and RNG
    pub env: SimEnv,
    /// Store behind sessions, routing buckets and channels
    pub store: MemoryStore<SimEnv>,
    /// Message store
    pub messages: MemoryMessageStore,
    /// Channel delivery
    pub delivery: FlakyDelivery,
    /// The server
    pub shroud: SimShroud,
}

impl SimServer {
    /// Default configuration, seed 0.
    pub fn new() -> Self {
        Self::with_config(0, ServerConfig::default())
    }

    /// Default configuration, given seed.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_config(seed, ServerConfig::default())
    }

    /// Custom configuration and seed.
    pub fn with_config(seed: u64, config: ServerConfig) -> Self {
        let env = SimEnv::with_seed(seed);
        let store = MemoryStore::new(env.clone());
        let messages = MemoryMessageStore::new();
        let delivery = FlakyDelivery::new();

        let backends =
            Backends { sessions: store.clone(), messages: messages.clone(), routing: store.clone() };
        let shroud = Shroud::new(env.clone(), backends, delivery.clone(), config);

        Self { env, store, messages, delivery, shroud }
    }

    /// Move simulated time forward.
    pub fn advance(&self, duration: Duration) {
        self.env.advance(duration);
    }
}

impl Default for SimServer {
    fn default() -> Self {
        Self::new()
    }
}
