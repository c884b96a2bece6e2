//! Envelope sealing using `XChaCha20-Poly1305`
//!
//! All functions are pure - nonces and random bytes are provided by the
//! caller. The engine owns nonce construction so it can enforce uniqueness.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};

use crate::{envelope::Envelope, error::CryptoError};

/// Size of the `XChaCha20` nonce (24 bytes)
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// Size of the random part of the nonce (16 bytes)
pub const NONCE_RANDOM_SIZE: usize = 16;

/// Largest usage counter that fits in the nonce (56 bits).
pub const MAX_NONCE_COUNTER: u64 = (1 << 56) - 1;

/// What a key is being used for. Encoded in the first nonce byte so message
/// and file counters can never produce the same nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyDomain {
    /// Chat messages
    Message = 0x01,
    /// File chunks
    File = 0x02,
}

impl KeyDomain {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Message),
            0x02 => Some(Self::File),
            _ => None,
        }
    }
}

/// Build a 24-byte nonce for `XChaCha20`.
///
/// Structure:
/// - byte 0: key domain
/// - bytes 1-7: usage counter (low 56 bits, big-endian)
/// - bytes 8-23: random (caller-provided)
pub fn build_nonce(
    domain: KeyDomain,
    counter: u64,
    random: [u8; NONCE_RANDOM_SIZE],
) -> [u8; NONCE_SIZE] {
    debug_assert!(counter <= MAX_NONCE_COUNTER);

    let mut nonce = [0u8; NONCE_SIZE];
    nonce[0] = domain as u8;
    nonce[1..8].copy_from_slice(&counter.to_be_bytes()[1..8]);
    nonce[8..24].copy_from_slice(&random);
    nonce
}

/// Domain a nonce was built for. `None` for unknown tags.
pub fn nonce_domain(nonce: &[u8; NONCE_SIZE]) -> Option<KeyDomain> {
    KeyDomain::from_byte(nonce[0])
}

/// Encrypt `plaintext` under `key` with the given nonce and associated data.
pub fn seal(key: &[u8; 32], nonce: [u8; NONCE_SIZE], plaintext: &[u8], aad: &[u8]) -> Envelope {
    let cipher = XChaCha20Poly1305::new(key.into());

    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), Payload { msg: plaintext, aad })
    else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    Envelope::new(nonce, ciphertext)
}

/// Authenticate and decrypt an envelope.
///
/// # Errors
///
/// - `AuthenticationFailure`: tag mismatch (tampering, wrong key, wrong aad)
pub fn open(key: &[u8; 32], envelope: &Envelope, aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(envelope.nonce());

    cipher
        .decrypt(nonce, Payload { msg: envelope.ciphertext(), aad })
        .map_err(|_| CryptoError::AuthenticationFailure)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [0x42; 32];

    #[test]
    fn seal_open_roundtrip() {
        let nonce = build_nonce(KeyDomain::Message, 0, [0xAB; NONCE_RANDOM_SIZE]);
        let envelope = seal(&KEY, nonce, b"Hello, World!", b"chat");

        let opened = open(&KEY, &envelope, b"chat").unwrap();
        assert_eq!(opened, b"Hello, World!");
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let nonce = build_nonce(KeyDomain::File, 7, [0x00; NONCE_RANDOM_SIZE]);
        let envelope = seal(&KEY, nonce, b"", b"");

        assert_eq!(envelope.ciphertext().len(), TAG_SIZE);
        assert!(open(&KEY, &envelope, b"").unwrap().is_empty());
    }

    #[test]
    fn wrong_aad_fails() {
        let nonce = build_nonce(KeyDomain::Message, 0, [0x01; NONCE_RANDOM_SIZE]);
        let envelope = seal(&KEY, nonce, b"secret", b"chat-a");

        assert_eq!(open(&KEY, &envelope, b"chat-b"), Err(CryptoError::AuthenticationFailure));
    }

    #[test]
    fn wrong_key_fails() {
        let nonce = build_nonce(KeyDomain::Message, 0, [0x01; NONCE_RANDOM_SIZE]);
        let envelope = seal(&KEY, nonce, b"secret", b"");

        assert_eq!(open(&[0x43; 32], &envelope, b""), Err(CryptoError::AuthenticationFailure));
    }

    #[test]
    fn nonce_structure() {
        let random = [0xCD; NONCE_RANDOM_SIZE];
        let nonce = build_nonce(KeyDomain::File, 0x0001_0203_0405_0607, random);

        assert_eq!(nonce[0], 0x02);
        assert_eq!(&nonce[1..8], &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07]);
        assert_eq!(&nonce[8..24], &random);
        assert_eq!(nonce_domain(&nonce), Some(KeyDomain::File));
    }

    #[test]
    fn domains_never_collide() {
        let random = [0u8; NONCE_RANDOM_SIZE];
        assert_ne!(
            build_nonce(KeyDomain::Message, 5, random),
            build_nonce(KeyDomain::File, 5, random)
        );
    }

    #[test]
    fn unknown_domain_tag() {
        let mut nonce = build_nonce(KeyDomain::Message, 0, [0; NONCE_RANDOM_SIZE]);
        nonce[0] = 0x7F;
        assert_eq!(nonce_domain(&nonce), None);
    }
}
