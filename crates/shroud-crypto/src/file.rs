//! Chunked file encryption
//!
//! Files are split into fixed-size chunks, each sealed as its own envelope.
//! Every chunk's associated data binds it to the chat, the file, its position
//! and whether it is the last chunk, so chunks cannot be reordered, dropped,
//! truncated or spliced between files without failing authentication.

use crate::{envelope::Envelope, error::CryptoError};

/// Associated data for a file chunk.
///
/// Layout: `"file:" || file_id (16) || index (u32 BE) || final (u8) || chat_id`
pub(crate) fn chunk_aad(chat_id: &str, file_id: &[u8; 16], index: u32, is_final: bool) -> Vec<u8> {
    let mut aad = Vec::with_capacity(5 + 16 + 4 + 1 + chat_id.len());
    aad.extend_from_slice(b"file:");
    aad.extend_from_slice(file_id);
    aad.extend_from_slice(&index.to_be_bytes());
    aad.push(u8::from(is_final));
    aad.extend_from_slice(chat_id.as_bytes());
    aad
}

/// An encrypted file: ordered chunk envelopes plus the plaintext length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedFile {
    file_id: [u8; 16],
    total_len: u64,
    chunks: Vec<Envelope>,
}

impl EncryptedFile {
    /// Assemble from parts received over the wire.
    pub fn new(file_id: [u8; 16], total_len: u64, chunks: Vec<Envelope>) -> Self {
        Self { file_id, total_len, chunks }
    }

    /// Random identifier chosen when the file was sealed.
    pub fn file_id(&self) -> &[u8; 16] {
        &self.file_id
    }

    /// Plaintext length in bytes.
    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    /// Chunk envelopes in order.
    pub fn chunks(&self) -> &[Envelope] {
        &self.chunks
    }
}

/// In-progress chunked encryption of one file.
///
/// Tracks position and which chat key the file was started under. Created by
/// `CryptoEngine::begin_file`.
#[derive(Debug)]
pub struct FileSealer {
    chat_id: String,
    key_id: [u8; 8],
    file_id: [u8; 16],
    total_len: u64,
    sealed_len: u64,
    next_index: u32,
    complete: bool,
}

impl FileSealer {
    pub(crate) fn new(chat_id: &str, key_id: [u8; 8], file_id: [u8; 16], total_len: u64) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            key_id,
            file_id,
            total_len,
            sealed_len: 0,
            next_index: 0,
            complete: false,
        }
    }

    /// Chat this file is being sealed for.
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// File identifier.
    pub fn file_id(&self) -> &[u8; 16] {
        &self.file_id
    }

    pub(crate) fn key_id(&self) -> [u8; 8] {
        self.key_id
    }

    /// Bytes sealed so far.
    pub fn sealed_len(&self) -> u64 {
        self.sealed_len
    }

    /// Whether the final chunk has been sealed.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Claim the next chunk position for `len` bytes.
    ///
    /// Returns the chunk index and whether this chunk finishes the file.
    pub(crate) fn reserve(&mut self, len: usize) -> Result<(u32, bool), CryptoError> {
        if self.complete {
            return Err(CryptoError::FileComplete);
        }

        let sealed = self.sealed_len + len as u64;
        if sealed > self.total_len {
            return Err(CryptoError::CapacityExceeded { size: sealed, limit: self.total_len });
        }

        // Only the chunk that reaches total_len is final; empty chunks before
        // that are rejected so the index space cannot be padded.
        if len == 0 && sealed != self.total_len {
            return Err(CryptoError::MalformedEnvelope { reason: "empty non-final chunk".to_string() });
        }

        let index = self.next_index;
        let is_final = sealed == self.total_len;

        self.sealed_len = sealed;
        self.next_index += 1;
        self.complete = is_final;

        Ok((index, is_final))
    }
}

/// In-progress chunked decryption of one file.
///
/// Chunks must be opened in order. Created by `CryptoEngine::begin_open`.
#[derive(Debug)]
pub struct FileOpener {
    chat_id: String,
    file_id: [u8; 16],
    total_len: u64,
    chunk_count: usize,
    opened_len: u64,
    next_index: usize,
}

impl FileOpener {
    pub(crate) fn new(chat_id: &str, file_id: [u8; 16], total_len: u64, chunk_count: usize) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            file_id,
            total_len,
            chunk_count,
            opened_len: 0,
            next_index: 0,
        }
    }

    /// Chat this file was sealed for.
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Whether every chunk has been opened and the length matches.
    pub fn is_complete(&self) -> bool {
        self.next_index == self.chunk_count && self.opened_len == self.total_len
    }

    /// Associated data for the next chunk, advancing the position.
    pub(crate) fn next_aad(&mut self) -> Result<Vec<u8>, CryptoError> {
        if self.next_index >= self.chunk_count {
            return Err(CryptoError::FileComplete);
        }

        let index = u32::try_from(self.next_index).map_err(|_| CryptoError::AuthenticationFailure)?;
        let is_final = self.next_index + 1 == self.chunk_count;
        self.next_index += 1;

        Ok(chunk_aad(&self.chat_id, &self.file_id, index, is_final))
    }

    /// Account for an authenticated chunk.
    pub(crate) fn record(&mut self, len: usize) -> Result<(), CryptoError> {
        self.opened_len += len as u64;
        if self.opened_len > self.total_len {
            return Err(CryptoError::AuthenticationFailure);
        }
        Ok(())
    }
}
