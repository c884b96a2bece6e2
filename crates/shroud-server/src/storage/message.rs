#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use serde_json::{Map, Value};

use super::StorageError;

/// A persisted message as the store returns it.
///
/// `metadata` holds every record field other than id, chat id and content
/// (message type, timestamp, size and any client extension fields). The
/// router re-scans it on every read.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    /// Message id
    pub id: String,
    /// Chat the message belongs to
    pub chat_id: String,
    /// Opaque envelope in transport encoding
    pub encrypted_content: String,
    /// Remaining record fields
    pub metadata: Map<String, Value>,
}

/// Persistent message store.
///
/// Same shape as [`super::ExpiringStore`]: Clone, Send + Sync, synchronous.
pub trait MessageStore: Clone + Send + Sync + 'static {
    /// Persist a message. Overwrites an existing message with the same id;
    /// an overwrite naming another chat moves the message to that chat.
    fn store_message(
        &self,
        id: &str,
        ciphertext: &str,
        chat_id: &str,
        metadata: &Map<String, Value>,
    ) -> Result<(), StorageError>;

    /// Load one message. `None` if absent.
    fn get_message(&self, id: &str) -> Result<Option<StoredMessage>, StorageError>;

    /// Messages of a chat, newest first, skipping `offset` and returning at
    /// most `limit`.
    fn get_chat_messages(
        &self,
        chat_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredMessage>, StorageError>;

    /// Delete one message. Returns whether it existed.
    fn delete_message(&self, id: &str, chat_id: &str) -> Result<bool, StorageError>;
}

/// In-memory message store.
///
/// Messages are indexed by id and by chat in arrival order. Uses
/// `lock().expect()` which will panic if the mutex is poisoned.
#[derive(Clone, Default)]
pub struct MemoryMessageStore {
    inner: Arc<Mutex<MemoryMessageStoreInner>>,
}

#[derive(Default)]
struct MemoryMessageStoreInner {
    messages: HashMap<String, StoredMessage>,

    /// Message ids per chat, oldest first
    chats: HashMap<String, Vec<String>>,
}

impl MemoryMessageStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored messages.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn message_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").messages.len()
    }
}

impl MessageStore for MemoryMessageStore {
    #[allow(clippy::expect_used)]
    fn store_message(
        &self,
        id: &str,
        ciphertext: &str,
        chat_id: &str,
        metadata: &Map<String, Value>,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        let message = StoredMessage {
            id: id.to_string(),
            chat_id: chat_id.to_string(),
            encrypted_content: ciphertext.to_string(),
            metadata: metadata.clone(),
        };

        match inner.messages.insert(id.to_string(), message) {
            Some(previous) if previous.chat_id == chat_id => {},
            Some(previous) => {
                if let Some(ids) = inner.chats.get_mut(&previous.chat_id) {
                    ids.retain(|existing| existing != id);
                    if ids.is_empty() {
                        inner.chats.remove(&previous.chat_id);
                    }
                }
                inner.chats.entry(chat_id.to_string()).or_default().push(id.to_string());
            },
            None => inner.chats.entry(chat_id.to_string()).or_default().push(id.to_string()),
        }

        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn get_message(&self, id: &str) -> Result<Option<StoredMessage>, StorageError> {
        Ok(self.inner.lock().expect("Mutex poisoned").messages.get(id).cloned())
    }

    #[allow(clippy::expect_used)]
    fn get_chat_messages(
        &self,
        chat_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredMessage>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");

        let Some(ids) = inner.chats.get(chat_id) else {
            return Ok(Vec::new());
        };

        Ok(ids
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .filter_map(|id| inner.messages.get(id).cloned())
            .collect())
    }

    #[allow(clippy::expect_used)]
    fn delete_message(&self, id: &str, chat_id: &str) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        let belongs = inner.messages.get(id).is_some_and(|message| message.chat_id == chat_id);
        if !belongs {
            return Ok(false);
        }

        inner.messages.remove(id);
        if let Some(ids) = inner.chats.get_mut(chat_id) {
            ids.retain(|existing| existing != id);
            if ids.is_empty() {
                inner.chats.remove(chat_id);
            }
        }

        Ok(true)
    }
}
