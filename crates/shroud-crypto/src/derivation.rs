//! Chat key derivation using HKDF

use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Label used for chat key derivation
const CHAT_KEY_LABEL: &[u8] = b"shroudChatKeyV1";

/// Label used for key identifiers
const KEY_ID_LABEL: &[u8] = b"shroudKeyIdV1";

/// Derive the symmetric key for a chat from an X25519 agreement output.
///
/// Both peers compute the same agreement output, so both derive the same key
/// for the same `chat_id`.
///
/// # Security
///
/// - Different chats produce different keys from the same agreement
/// - The chat id is length-prefixed so no two ids share an info string
/// - Deterministic: same inputs always produce same output
pub fn derive_chat_key(agreement: &[u8; 32], chat_id: &str) -> Zeroizing<[u8; 32]> {
    let hkdf = Hkdf::<Sha256>::new(None, agreement);

    // label || len(chat_id) || chat_id
    let mut info = Vec::with_capacity(CHAT_KEY_LABEL.len() + 4 + chat_id.len());
    info.extend_from_slice(CHAT_KEY_LABEL);
    info.extend_from_slice(&(chat_id.len() as u32).to_be_bytes());
    info.extend_from_slice(chat_id.as_bytes());

    let mut key = Zeroizing::new([0u8; 32]);
    let Ok(()) = hkdf.expand(&info, &mut key[..]) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    key
}

/// Short public identifier for a derived key.
///
/// Lets two peers confirm they derived the same key without revealing it.
pub fn key_id(key: &[u8; 32]) -> [u8; 8] {
    let digest = Sha256::new().chain_update(KEY_ID_LABEL).chain_update(key).finalize();

    let mut id = [0u8; 8];
    id.copy_from_slice(&digest[..8]);
    id
}
