//! Envelope and payload encoding
//!
//! An envelope is `nonce || ciphertext` and is the only thing that leaves the
//! client. The router treats it as opaque bytes. Transport encoding is
//! unpadded URL-safe base64.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use crate::{
    aead::{NONCE_SIZE, TAG_SIZE},
    error::CryptoError,
    keys::canonicalize,
};

/// Authenticated-encryption output: `nonce || ciphertext`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    nonce: [u8; NONCE_SIZE],
    /// Ciphertext including the 16-byte Poly1305 tag
    ciphertext: Vec<u8>,
}

impl Envelope {
    /// Smallest valid serialized envelope (nonce plus an empty sealed body).
    pub const MIN_LEN: usize = NONCE_SIZE + TAG_SIZE;

    pub(crate) fn new(nonce: [u8; NONCE_SIZE], ciphertext: Vec<u8>) -> Self {
        Self { nonce, ciphertext }
    }

    /// The 24-byte `XChaCha20` nonce.
    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }

    /// Ciphertext including the authentication tag.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Plaintext length (ciphertext length minus authentication tag).
    pub fn plaintext_len(&self) -> usize {
        self.ciphertext.len().saturating_sub(TAG_SIZE)
    }

    /// Serialized length in bytes.
    pub fn len(&self) -> usize {
        NONCE_SIZE + self.ciphertext.len()
    }

    /// Always false: an envelope carries at least a nonce and a tag.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Serialize as `nonce || ciphertext`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse `nonce || ciphertext`.
    ///
    /// Only checks framing; authenticity is checked on decryption.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < Self::MIN_LEN {
            return Err(CryptoError::MalformedEnvelope {
                reason: format!("{} bytes is shorter than minimum {}", bytes.len(), Self::MIN_LEN),
            });
        }

        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_SIZE);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(nonce_bytes);

        Ok(Self { nonce, ciphertext: ciphertext.to_vec() })
    }

    /// Transport encoding (unpadded URL-safe base64).
    pub fn to_transport(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.to_bytes())
    }

    /// Parse the transport encoding.
    pub fn from_transport(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| CryptoError::MalformedEnvelope { reason: e.to_string() })?;
        Self::from_bytes(&bytes)
    }
}

/// Kind of plaintext carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    /// UTF-8 text
    Text,
    /// Structured JSON value
    Json,
    /// Raw bytes
    Binary,
}

impl PayloadKind {
    fn tag(self) -> u8 {
        match self {
            Self::Text => 0x01,
            Self::Json => 0x02,
            Self::Binary => 0x03,
        }
    }
}

/// Plaintext payload of a chat message.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// UTF-8 text
    Text(String),
    /// Structured JSON value, encoded canonically
    Json(serde_json::Value),
    /// Raw bytes
    Binary(Vec<u8>),
}

impl Payload {
    /// Kind of this payload.
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Text(_) => PayloadKind::Text,
            Self::Json(_) => PayloadKind::Json,
            Self::Binary(_) => PayloadKind::Binary,
        }
    }

    /// Encode as `kind tag || body`.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let body = match self {
            Self::Text(text) => text.as_bytes().to_vec(),
            Self::Json(value) => canonicalize(value),
            Self::Binary(bytes) => bytes.clone(),
        };

        let mut out = Vec::with_capacity(1 + body.len());
        out.push(self.kind().tag());
        out.extend_from_slice(&body);
        out
    }

    /// Decode authenticated plaintext produced by [`Payload::encode`].
    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, CryptoError> {
        let Some((&tag, body)) = bytes.split_first() else {
            return Err(CryptoError::MalformedEnvelope { reason: "empty plaintext".to_string() });
        };

        match tag {
            0x01 => String::from_utf8(body.to_vec()).map(Self::Text).map_err(|_| {
                CryptoError::MalformedEnvelope { reason: "text payload is not UTF-8".to_string() }
            }),
            0x02 => serde_json::from_slice(body)
                .map(Self::Json)
                .map_err(|e| CryptoError::MalformedEnvelope { reason: e.to_string() }),
            0x03 => Ok(Self::Binary(body.to_vec())),
            other => Err(CryptoError::MalformedEnvelope {
                reason: format!("unknown payload tag {other:#04x}"),
            }),
        }
    }
}

/// Result of encrypting a message.
///
/// `plaintext_len` and `kind` exist for the UI only. Nothing here identifies
/// the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    /// The envelope to hand to the router
    pub envelope: Envelope,
    /// Encoded plaintext size in bytes
    pub plaintext_len: usize,
    /// Kind of the plaintext
    pub kind: PayloadKind,
}
