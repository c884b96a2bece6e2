//! Deterministic simulation harness for Shroud.
//!
//! - [`SimEnv`]: virtual clock and seeded RNG. Session expiry, rotation
//!   intervals and routing TTLs are tested by advancing the clock instead of
//!   waiting.
//! - [`FlakyDelivery`]: channel delivery with scripted transient and
//!   permanent failures.
//! - [`SimServer`]: a fully wired server on top of both.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod flaky_delivery;
pub mod sim_env;
pub mod sim_server;

pub use flaky_delivery::FlakyDelivery;
pub use sim_env::{SIM_EPOCH_MS, SimEnv};
pub use sim_server::{SimServer, SimShroud};
