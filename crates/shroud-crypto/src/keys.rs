//! Key material: X25519 agreement keys, Ed25519 signing keys, signatures.
//!
//! Secret halves never leave this module. Public halves are 32-byte newtypes
//! with a base64 transport encoding.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::Signer as _;
use serde_json::Value;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Size of X25519 and Ed25519 public keys
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of an Ed25519 signature
pub const SIGNATURE_SIZE: usize = 64;

fn decode_fixed<const N: usize>(encoded: &str, what: &str) -> Result<[u8; N], CryptoError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| CryptoError::InvalidKey { reason: format!("{what}: {e}") })?;
    fixed_from_slice(&bytes, what)
}

fn fixed_from_slice<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N], CryptoError> {
    bytes.try_into().map_err(|_| CryptoError::InvalidKey {
        reason: format!("{what} must be {N} bytes, got {}", bytes.len()),
    })
}

/// X25519 public key used for key agreement.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse from a slice of exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        fixed_from_slice(bytes, "public key").map(Self)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Transport encoding (unpadded URL-safe base64).
    pub fn to_transport(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    /// Parse the transport encoding.
    pub fn from_transport(encoded: &str) -> Result<Self, CryptoError> {
        decode_fixed(encoded, "public key").map(Self)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", &self.to_transport()[..8])
    }
}

/// Ed25519 public key used to verify detached signatures.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SigningPublicKey([u8; PUBLIC_KEY_SIZE]);

impl SigningPublicKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Transport encoding (unpadded URL-safe base64).
    pub fn to_transport(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    /// Parse the transport encoding.
    pub fn from_transport(encoded: &str) -> Result<Self, CryptoError> {
        decode_fixed(encoded, "signing key").map(Self)
    }
}

impl fmt::Debug for SigningPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningPublicKey({})", &self.to_transport()[..8])
    }
}

/// Detached Ed25519 signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_SIZE]);

impl Signature {
    /// Raw signature bytes.
    pub fn to_bytes(&self) -> [u8; SIGNATURE_SIZE] {
        self.0
    }

    /// Parse from a slice of exactly 64 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        fixed_from_slice(bytes, "signature").map(Self)
    }

    /// Transport encoding (unpadded URL-safe base64).
    pub fn to_transport(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    /// Parse the transport encoding.
    pub fn from_transport(encoded: &str) -> Result<Self, CryptoError> {
        decode_fixed(encoded, "signature").map(Self)
    }
}

/// Ephemeral X25519 keypair, scoped to one engine session.
pub(crate) struct AgreementKeyPair {
    secret: x25519_dalek::StaticSecret,
    public: PublicKey,
}

impl AgreementKeyPair {
    pub(crate) fn from_seed(seed: &Zeroizing<[u8; 32]>) -> Self {
        let secret = x25519_dalek::StaticSecret::from(**seed);
        let public = PublicKey(x25519_dalek::PublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }

    pub(crate) fn public(&self) -> PublicKey {
        self.public
    }

    /// Raw X25519 agreement with a peer.
    ///
    /// Rejects low-order peer keys, which would force an all-zero output.
    pub(crate) fn agree(&self, peer: &PublicKey) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        let shared = self.secret.diffie_hellman(&x25519_dalek::PublicKey::from(peer.0));
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidKey {
                reason: "peer public key is a low-order point".to_string(),
            });
        }
        Ok(Zeroizing::new(shared.to_bytes()))
    }
}

/// Ed25519 signing keypair.
pub(crate) struct SigningKeyPair {
    key: ed25519_dalek::SigningKey,
}

impl SigningKeyPair {
    pub(crate) fn from_seed(seed: &Zeroizing<[u8; 32]>) -> Self {
        Self { key: ed25519_dalek::SigningKey::from_bytes(seed) }
    }

    pub(crate) fn public(&self) -> SigningPublicKey {
        SigningPublicKey(self.key.verifying_key().to_bytes())
    }

    pub(crate) fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.key.sign(message).to_bytes())
    }
}

/// Verify a detached signature.
///
/// Pure function: no engine state is read or modified. Malformed keys verify
/// as `false`.
pub fn verify(message: &[u8], signature: &Signature, public_key: &SigningPublicKey) -> bool {
    let Ok(verifying_key) = ed25519_dalek::VerifyingKey::from_bytes(&public_key.0) else {
        return false;
    };
    let signature = ed25519_dalek::Signature::from_bytes(&signature.0);

    verifying_key.verify_strict(message, &signature).is_ok()
}

/// Canonical JSON encoding: object keys sorted, no insignificant whitespace.
///
/// Two structurally equal values always produce identical bytes, which is
/// what signatures and payload encoding are computed over.
pub fn canonicalize(value: &Value) -> Vec<u8> {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out.into_bytes()
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(key.as_str()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        },
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        },
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn seed(byte: u8) -> Zeroizing<[u8; 32]> {
        Zeroizing::new([byte; 32])
    }

    #[test]
    fn agreement_is_symmetric() {
        let alice = AgreementKeyPair::from_seed(&seed(1));
        let bob = AgreementKeyPair::from_seed(&seed(2));

        let ab = alice.agree(&bob.public()).unwrap();
        let ba = bob.agree(&alice.public()).unwrap();
        assert_eq!(*ab, *ba);
    }

    #[test]
    fn low_order_peer_rejected() {
        let alice = AgreementKeyPair::from_seed(&seed(1));
        let zero = PublicKey::from_bytes([0u8; 32]);

        assert!(matches!(alice.agree(&zero), Err(CryptoError::InvalidKey { .. })));
    }

    #[test]
    fn sign_and_verify() {
        let signer = SigningKeyPair::from_seed(&seed(7));
        let signature = signer.sign(b"message");

        assert!(verify(b"message", &signature, &signer.public()));
        assert!(!verify(b"messagf", &signature, &signer.public()));

        let other = SigningKeyPair::from_seed(&seed(8));
        assert!(!verify(b"message", &signature, &other.public()));
    }

    #[test]
    fn public_key_transport_roundtrip() {
        let key = AgreementKeyPair::from_seed(&seed(3)).public();
        assert_eq!(PublicKey::from_transport(&key.to_transport()).unwrap(), key);
    }

    #[test]
    fn wrong_length_key_rejected() {
        assert!(PublicKey::from_slice(&[0u8; 31]).is_err());
        assert!(Signature::from_slice(&[0u8; 63]).is_err());
        assert!(SigningPublicKey::from_transport("AAAA").is_err());
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let a = json!({"b": 1, "a": {"z": [1, 2], "y": null}});
        let b = json!({"a": {"y": null, "z": [1, 2]}, "b": 1});

        assert_eq!(canonicalize(&a), canonicalize(&b));
        assert_eq!(canonicalize(&a), br#"{"a":{"y":null,"z":[1,2]},"b":1}"#.to_vec());
    }

    #[test]
    fn canonical_json_escapes_keys() {
        let value = json!({"quo\"te": "v"});
        assert_eq!(canonicalize(&value), br#"{"quo\"te":"v"}"#.to_vec());
    }
}
