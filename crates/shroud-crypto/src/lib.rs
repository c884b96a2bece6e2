//! Shroud Client Cryptography
//!
//! End-to-end encryption for anonymous chats. Everything here runs on the
//! client; the router only ever sees opaque envelopes.
//!
//! # Key Lifecycle
//!
//! Each engine generates an X25519 agreement keypair and an Ed25519 signing
//! keypair on `initialize`. Per-chat keys come from an X25519 agreement with
//! the peer, expanded by HKDF with the chat id as context.
//!
//! ```text
//! X25519(own secret, peer public)
//!        │
//!        ▼
//! HKDF-SHA256(info = label || chat id) → Chat Key
//!        │
//!        ▼
//! XChaCha20-Poly1305(aad = chat id) → Envelope
//! ```
//!
//! `rotate_keys` replaces the agreement keypair and discards every chat key.
//! The signing keypair lives for the whole engine session.
//!
//! # Security
//!
//! Nonce uniqueness:
//! - Nonce = domain byte || 56-bit per-key counter || 16 random bytes
//! - Message and file-chunk counters live in separate domains
//! - An exhausted counter fails the operation instead of wrapping
//!
//! Authenticity:
//! - Every envelope is bound to its chat through associated data
//! - File chunks are additionally bound to file id, index and finality
//! - Any authentication failure surfaces as `AuthenticationFailure`
//!
//! Key hygiene:
//! - Chat keys and seeds are zeroized on drop
//! - Nothing is persisted

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod aead;
pub mod derivation;
pub mod engine;
pub mod entropy;
pub mod envelope;
pub mod error;
pub mod file;
pub mod keys;

pub use engine::{CryptoEngine, EngineConfig, KeyUsage, SharedSecretHandle};
pub use entropy::{EntropySource, OsEntropy};
pub use envelope::{Envelope, Payload, PayloadKind, SealedMessage};
pub use error::CryptoError;
pub use file::{EncryptedFile, FileOpener, FileSealer};
pub use keys::{PublicKey, Signature, SigningPublicKey, canonicalize, verify};
