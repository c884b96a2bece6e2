//! Shroud shared core
//!
//! Pieces every Shroud server component depends on:
//!
//! - [`env::Environment`]: clock, entropy and sleep, injectable for
//!   deterministic simulation
//! - [`ShroudError`]: the error taxonomy callers see, with a sanitized
//!   [`PublicError`] form for clients

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod env;
pub mod error;

pub use env::Environment;
pub use error::{ErrorCategory, PublicError, ResourceKind, ShroudError};
