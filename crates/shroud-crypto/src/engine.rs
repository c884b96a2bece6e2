//! Client-side cryptographic engine
//!
//! Owns the session's key material and enforces the key lifecycle:
//!
//! ```text
//! initialize()            → X25519 + Ed25519 keypairs
//!        │
//!        ▼
//! derive_shared_secret()  → per-chat key (replaces any previous one)
//!        │
//!        ▼
//! encrypt()/decrypt()     → envelopes under the cached chat key
//!        │
//!        ▼
//! rotate_keys()           → new X25519 keypair, every chat key discarded
//! ```
//!
//! Nothing is persisted. Chat keys are zeroized when replaced or dropped.

use std::collections::HashMap;

use zeroize::Zeroizing;

use crate::{
    aead::{self, KeyDomain, MAX_NONCE_COUNTER, NONCE_RANDOM_SIZE},
    derivation::{derive_chat_key, key_id},
    entropy::{EntropySource, OsEntropy},
    envelope::{Envelope, Payload, SealedMessage},
    error::CryptoError,
    file::{EncryptedFile, FileOpener, FileSealer, chunk_aad},
    keys::{AgreementKeyPair, PublicKey, Signature, SigningKeyPair, SigningPublicKey, canonicalize},
};

/// Default limit for a single message payload (1 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Default limit for a file (100 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Default file chunk size (64 KiB)
pub const DEFAULT_FILE_CHUNK_SIZE: usize = 64 * 1024;

/// Engine limits.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Largest encoded message payload accepted by `encrypt`
    pub max_message_size: usize,
    /// Largest file accepted by `encrypt_file`
    pub max_file_size: u64,
    /// Plaintext bytes per file chunk
    pub file_chunk_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            file_chunk_size: DEFAULT_FILE_CHUNK_SIZE,
        }
    }
}

/// Public handle for a derived chat key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedSecretHandle {
    /// Chat the key belongs to
    pub chat_id: String,
    /// Public identifier of the key (peers with the same id share the key)
    pub key_id: [u8; 8],
}

/// Usage counters for a chat key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyUsage {
    /// Messages encrypted
    pub messages: u64,
    /// File chunks encrypted
    pub file_chunks: u64,
}

/// Cached key for one chat.
pub(crate) struct ChatSecret {
    key: Zeroizing<[u8; 32]>,
    key_id: [u8; 8],
    usage: KeyUsage,
}

impl ChatSecret {
    pub(crate) fn key(&self) -> &[u8; 32] {
        &self.key
    }

    pub(crate) fn key_id(&self) -> [u8; 8] {
        self.key_id
    }

    /// Reserve the next nonce counter for a domain.
    ///
    /// Counters are per key and per domain, and never wrap.
    fn next_counter(&mut self, domain: KeyDomain) -> Result<u64, CryptoError> {
        let counter = match domain {
            KeyDomain::Message => &mut self.usage.messages,
            KeyDomain::File => &mut self.usage.file_chunks,
        };

        if *counter > MAX_NONCE_COUNTER {
            return Err(CryptoError::UsageExhausted { uses: *counter });
        }

        let current = *counter;
        *counter += 1;
        Ok(current)
    }
}

/// Client-side cryptographic engine.
///
/// Generic over the entropy source so tests can run deterministically;
/// production code uses [`OsEntropy`].
pub struct CryptoEngine<R: EntropySource = OsEntropy> {
    entropy: R,
    config: EngineConfig,
    agreement: Option<AgreementKeyPair>,
    signing: Option<SigningKeyPair>,
    secrets: HashMap<String, ChatSecret>,
}

impl CryptoEngine<OsEntropy> {
    /// Engine backed by the OS RNG with default limits.
    pub fn new() -> Self {
        Self::with_entropy(OsEntropy, EngineConfig::default())
    }
}

impl Default for CryptoEngine<OsEntropy> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: EntropySource> CryptoEngine<R> {
    /// Engine with an explicit entropy source and limits.
    pub fn with_entropy(entropy: R, config: EngineConfig) -> Self {
        Self { entropy, config, agreement: None, signing: None, secrets: HashMap::new() }
    }

    /// Engine limits.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Generate fresh keypairs for this session.
    ///
    /// Calling again starts a new session: both keypairs are replaced and all
    /// chat keys are discarded.
    pub fn initialize(&mut self) -> Result<PublicKey, CryptoError> {
        let agreement = AgreementKeyPair::from_seed(&self.random_seed()?);
        let signing = SigningKeyPair::from_seed(&self.random_seed()?);

        let public = agreement.public();
        self.agreement = Some(agreement);
        self.signing = Some(signing);
        self.secrets.clear();

        Ok(public)
    }

    /// Whether `initialize` has run.
    pub fn is_initialized(&self) -> bool {
        self.agreement.is_some()
    }

    /// Current agreement public key. `None` before `initialize`.
    pub fn public_key(&self) -> Option<PublicKey> {
        self.agreement.as_ref().map(AgreementKeyPair::public)
    }

    /// Signing public key. `None` before `initialize`.
    pub fn signing_public_key(&self) -> Option<SigningPublicKey> {
        self.signing.as_ref().map(SigningKeyPair::public)
    }

    /// Agree on a key with a peer and cache it for `chat_id`.
    ///
    /// Replaces any key previously cached for the chat, so this is also the
    /// rekey operation.
    pub fn derive_shared_secret(
        &mut self,
        peer_public_key: &PublicKey,
        chat_id: &str,
    ) -> Result<SharedSecretHandle, CryptoError> {
        let agreement = self
            .agreement
            .as_ref()
            .ok_or(CryptoError::KeysNotReady { reason: "engine not initialized" })?;

        let raw = agreement.agree(peer_public_key)?;
        let key = derive_chat_key(&raw, chat_id);
        let id = key_id(&key);

        // Insert drops (and zeroizes) the previous key for this chat
        self.secrets.insert(
            chat_id.to_string(),
            ChatSecret { key, key_id: id, usage: KeyUsage::default() },
        );

        Ok(SharedSecretHandle { chat_id: chat_id.to_string(), key_id: id })
    }

    /// Whether a key is cached for `chat_id`.
    pub fn has_shared_secret(&self, chat_id: &str) -> bool {
        self.secrets.contains_key(chat_id)
    }

    /// Usage counters for the key cached for `chat_id`.
    pub fn usage(&self, chat_id: &str) -> Option<KeyUsage> {
        self.secrets.get(chat_id).map(|secret| secret.usage)
    }

    /// Encrypt a payload for a chat.
    ///
    /// Every call uses a fresh nonce: per-key counter plus 16 random bytes.
    ///
    /// # Errors
    ///
    /// - `KeysNotReady`: no key cached for `chat_id`
    /// - `CapacityExceeded`: encoded payload larger than the message limit
    pub fn encrypt(&mut self, payload: &Payload, chat_id: &str) -> Result<SealedMessage, CryptoError> {
        let plaintext = Zeroizing::new(payload.encode());
        if plaintext.len() > self.config.max_message_size {
            return Err(CryptoError::CapacityExceeded {
                size: plaintext.len() as u64,
                limit: self.config.max_message_size as u64,
            });
        }

        let random: [u8; NONCE_RANDOM_SIZE] = self.entropy.array()?;
        let secret = self.secret_mut(chat_id)?;
        let counter = secret.next_counter(KeyDomain::Message)?;
        let nonce = aead::build_nonce(KeyDomain::Message, counter, random);

        let envelope = aead::seal(secret.key(), nonce, &plaintext, &message_aad(chat_id));

        Ok(SealedMessage { envelope, plaintext_len: plaintext.len(), kind: payload.kind() })
    }

    /// Authenticate and decrypt a message envelope.
    ///
    /// # Errors
    ///
    /// - `KeysNotReady`: no key cached for `chat_id` (never derived, or
    ///   discarded by `rotate_keys`)
    /// - `AuthenticationFailure`: tampered, corrupted, or not a message
    ///   envelope for this chat
    pub fn decrypt(&self, envelope: &Envelope, chat_id: &str) -> Result<Payload, CryptoError> {
        let secret = self.secret(chat_id)?;

        if aead::nonce_domain(envelope.nonce()) != Some(KeyDomain::Message) {
            return Err(CryptoError::AuthenticationFailure);
        }

        let plaintext = Zeroizing::new(aead::open(secret.key(), envelope, &message_aad(chat_id))?);
        Payload::decode(&plaintext)
    }

    /// Start a chunked file encryption.
    ///
    /// The sealer is bound to the chat key current at this moment; if the key
    /// is replaced before the last chunk, sealing fails with `KeysNotReady`.
    pub fn begin_file(&mut self, chat_id: &str, total_len: u64) -> Result<FileSealer, CryptoError> {
        if total_len > self.config.max_file_size {
            return Err(CryptoError::CapacityExceeded {
                size: total_len,
                limit: self.config.max_file_size,
            });
        }

        let file_id: [u8; 16] = self.entropy.array()?;
        let secret = self.secret(chat_id)?;

        Ok(FileSealer::new(chat_id, secret.key_id(), file_id, total_len))
    }

    /// Encrypt the next chunk of a file.
    ///
    /// Callers streaming a large file call this once per chunk and can yield
    /// between calls.
    pub fn seal_chunk(
        &mut self,
        sealer: &mut FileSealer,
        chunk: &[u8],
    ) -> Result<Envelope, CryptoError> {
        if chunk.len() > self.config.file_chunk_size {
            return Err(CryptoError::CapacityExceeded {
                size: chunk.len() as u64,
                limit: self.config.file_chunk_size as u64,
            });
        }

        let random: [u8; NONCE_RANDOM_SIZE] = self.entropy.array()?;
        let (index, is_final) = sealer.reserve(chunk.len())?;

        let secret = self.secret_mut(sealer.chat_id())?;
        if secret.key_id() != sealer.key_id() {
            return Err(CryptoError::KeysNotReady {
                reason: "chat key replaced during file encryption",
            });
        }

        let counter = secret.next_counter(KeyDomain::File)?;
        let nonce = aead::build_nonce(KeyDomain::File, counter, random);
        let aad = chunk_aad(sealer.chat_id(), sealer.file_id(), index, is_final);

        Ok(aead::seal(secret.key(), nonce, chunk, &aad))
    }

    /// Encrypt a whole file in chunks.
    ///
    /// An empty file produces a single empty final chunk.
    pub fn encrypt_file(&mut self, data: &[u8], chat_id: &str) -> Result<EncryptedFile, CryptoError> {
        let mut sealer = self.begin_file(chat_id, data.len() as u64)?;
        let mut chunks = Vec::with_capacity(data.len() / self.config.file_chunk_size + 1);

        if data.is_empty() {
            chunks.push(self.seal_chunk(&mut sealer, &[])?);
        } else {
            for chunk in data.chunks(self.config.file_chunk_size) {
                chunks.push(self.seal_chunk(&mut sealer, chunk)?);
            }
        }

        Ok(EncryptedFile::new(*sealer.file_id(), data.len() as u64, chunks))
    }

    /// Start a chunked file decryption.
    pub fn begin_open(&self, file: &EncryptedFile, chat_id: &str) -> Result<FileOpener, CryptoError> {
        self.secret(chat_id)?;

        if file.total_len() > self.config.max_file_size {
            return Err(CryptoError::CapacityExceeded {
                size: file.total_len(),
                limit: self.config.max_file_size,
            });
        }
        if file.chunks().is_empty() {
            return Err(CryptoError::AuthenticationFailure);
        }

        Ok(FileOpener::new(chat_id, *file.file_id(), file.total_len(), file.chunks().len()))
    }

    /// Authenticate and decrypt the next chunk of a file.
    pub fn open_chunk(&self, opener: &mut FileOpener, chunk: &Envelope) -> Result<Vec<u8>, CryptoError> {
        let secret = self.secret(opener.chat_id())?;

        if aead::nonce_domain(chunk.nonce()) != Some(KeyDomain::File) {
            return Err(CryptoError::AuthenticationFailure);
        }

        let aad = opener.next_aad()?;
        let plaintext = aead::open(secret.key(), chunk, &aad)?;
        opener.record(plaintext.len())?;

        Ok(plaintext)
    }

    /// Authenticate and decrypt a chunked file.
    ///
    /// Fails with `AuthenticationFailure` if any chunk was altered, dropped,
    /// reordered, or swapped in from another file.
    pub fn decrypt_file(&self, file: &EncryptedFile, chat_id: &str) -> Result<Vec<u8>, CryptoError> {
        let mut opener = self.begin_open(file, chat_id)?;
        let mut plaintext = Vec::with_capacity(decrypt_capacity(file));

        for chunk in file.chunks() {
            plaintext.extend_from_slice(&self.open_chunk(&mut opener, chunk)?);
        }

        if !opener.is_complete() {
            return Err(CryptoError::AuthenticationFailure);
        }

        Ok(plaintext)
    }

    /// Detached signature over raw bytes.
    pub fn sign(&self, message: &[u8]) -> Result<Signature, CryptoError> {
        let signing = self
            .signing
            .as_ref()
            .ok_or(CryptoError::KeysNotReady { reason: "engine not initialized" })?;
        Ok(signing.sign(message))
    }

    /// Detached signature over the canonical encoding of a JSON value.
    pub fn sign_json(&self, value: &serde_json::Value) -> Result<Signature, CryptoError> {
        self.sign(&canonicalize(value))
    }

    /// Replace the agreement keypair and discard every chat key.
    ///
    /// Envelopes sealed under the old keys can no longer be opened by this
    /// engine. Each chat must call `derive_shared_secret` again.
    pub fn rotate_keys(&mut self) -> Result<PublicKey, CryptoError> {
        if self.agreement.is_none() {
            return Err(CryptoError::KeysNotReady { reason: "engine not initialized" });
        }

        let agreement = AgreementKeyPair::from_seed(&self.random_seed()?);
        let public = agreement.public();

        self.agreement = Some(agreement);
        self.secrets.clear();

        Ok(public)
    }

    fn random_seed(&self) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        let mut seed = Zeroizing::new([0u8; 32]);
        self.entropy.fill(&mut seed[..])?;
        Ok(seed)
    }

    fn secret(&self, chat_id: &str) -> Result<&ChatSecret, CryptoError> {
        self.secrets
            .get(chat_id)
            .ok_or(CryptoError::KeysNotReady { reason: "no shared secret for chat" })
    }

    fn secret_mut(&mut self, chat_id: &str) -> Result<&mut ChatSecret, CryptoError> {
        self.secrets
            .get_mut(chat_id)
            .ok_or(CryptoError::KeysNotReady { reason: "no shared secret for chat" })
    }
}

/// Associated data for message envelopes: binds the envelope to its chat.
fn message_aad(chat_id: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(4 + chat_id.len());
    aad.extend_from_slice(b"msg:");
    aad.extend_from_slice(chat_id.as_bytes());
    aad
}

/// Output buffer size for `decrypt_file`.
///
/// Bounded by the ciphertext actually present; the declared `total_len` is
/// unauthenticated until every chunk has opened.
fn decrypt_capacity(file: &EncryptedFile) -> usize {
    let present: usize = file.chunks().iter().map(Envelope::plaintext_len).sum();
    usize::try_from(file.total_len()).map_or(present, |declared| declared.min(present))
}
