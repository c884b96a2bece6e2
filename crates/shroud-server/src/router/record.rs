//! Message, routing and channel records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shroud_core::{Environment, ShroudError};

use crate::storage::StoredMessage;

pub(crate) const ROUTE_KEY: &str = "route:";
const CHANNEL_KEY: &str = "channel:";

/// Prefix of message ids
pub const MESSAGE_PREFIX: &str = "msg_";
/// Prefix of channel ids
pub const CHANNEL_PREFIX: &str = "chan_";

/// Bucket key for the window containing `routed_at`.
///
/// Chat ids never contain `:`, so the window suffix is unambiguous.
pub(crate) fn route_key(chat_id: &str, routed_at: u64, window_ms: u64) -> String {
    format!("{ROUTE_KEY}{chat_id}:{}", routed_at / window_ms.max(1))
}

pub(crate) fn channel_key(channel_id: &str) -> String {
    format!("{CHANNEL_KEY}{channel_id}")
}

/// `msg_` + 32 hex chars
pub(crate) fn new_message_id<E: Environment>(env: &E) -> String {
    format!("{MESSAGE_PREFIX}{}", hex::encode(env.random_array::<16>()))
}

/// `chan_` + 32 hex chars
pub(crate) fn new_channel_id<E: Environment>(env: &E) -> String {
    format!("{CHANNEL_PREFIX}{}", hex::encode(env.random_array::<16>()))
}

/// Kind of content inside the envelope, as declared by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Text message
    #[default]
    Text,
    /// Image
    Image,
    /// Arbitrary file
    File,
    /// Audio clip
    Audio,
    /// Video clip
    Video,
    /// System notice
    System,
}

/// A message as persisted and returned to clients.
///
/// Carries no sender, device or location information. Extension fields are
/// flattened into the same JSON object and scanned like every other field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Message id
    pub id: String,
    /// Chat the message belongs to
    pub chat_id: String,
    /// Opaque envelope in transport encoding
    pub encrypted_content: String,
    /// Declared content kind
    pub message_type: MessageType,
    /// Routing time (ms since epoch)
    pub timestamp: u64,
    /// Envelope size in bytes
    pub size: usize,
    /// Client extension fields
    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

impl MessageRecord {
    /// Serialize to the JSON object that is scanned and persisted.
    pub fn to_value(&self) -> Result<Value, ShroudError> {
        serde_json::to_value(self).map_err(|err| ShroudError::Validation {
            field: "record",
            reason: err.to_string(),
        })
    }

    /// Split into the metadata the message store keeps next to id, chat id
    /// and content.
    pub(crate) fn metadata(value: Value) -> Map<String, Value> {
        let Value::Object(mut fields) = value else {
            return Map::new();
        };
        for core in ["id", "chatId", "encryptedContent"] {
            fields.remove(core);
        }
        fields
    }

    /// Reassemble the JSON object of a stored message.
    ///
    /// The store's own id, chat id and content win over same-named metadata.
    pub(crate) fn reassemble(stored: StoredMessage) -> Value {
        let mut fields = stored.metadata;
        fields.insert("id".to_string(), Value::String(stored.id));
        fields.insert("chatId".to_string(), Value::String(stored.chat_id));
        fields.insert("encryptedContent".to_string(), Value::String(stored.encrypted_content));
        Value::Object(fields)
    }
}

/// Options accepted by `route_message`.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    /// Declared content kind
    pub message_type: MessageType,
    /// Client extension fields, rejected under the strict scan policy
    pub extensions: Map<String, Value>,
}

/// Result of `route_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutedMessage {
    /// Assigned message id
    pub message_id: String,
    /// Always true on success
    pub routed: bool,
    /// Routing time (ms since epoch)
    pub timestamp: u64,
}

/// Ephemeral index entry linking a chat to a message.
///
/// Never returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRecord {
    /// Indexed message
    pub message_id: String,
    /// Owning chat
    pub chat_id: String,
    /// Routing time (ms since epoch)
    pub routed_at: u64,
    /// Relay hops so far
    pub hop_count: u32,
}

/// Routing records of one chat within one time window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RoutingBucket {
    pub(crate) entries: Vec<RoutingRecord>,
}

impl RoutingBucket {
    /// Drop entries routed at or before `cutoff`. Returns how many went.
    pub(crate) fn prune(&mut self, cutoff: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.routed_at > cutoff);
        before - self.entries.len()
    }

    pub(crate) fn newest(&self) -> Option<u64> {
        self.entries.iter().map(|entry| entry.routed_at).max()
    }
}

/// Ephemeral fan-out group of sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonymousChannel {
    /// Channel id
    pub channel_id: String,
    /// Primary ids of the participants, deduplicated
    pub participants: Vec<String>,
    /// Creation time (ms since epoch)
    pub created: u64,
}

/// Result of `create_anonymous_channel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelCreated {
    /// New channel id
    pub channel_id: String,
    /// Distinct participants
    pub participant_count: usize,
}

/// Result of `route_through_channel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelDelivery {
    /// Always true on success
    pub routed: bool,
    /// Recipients that accepted the envelope
    pub recipient_count: usize,
}

/// Result of `cleanup_routing_data`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    /// Chat buckets examined
    pub buckets_scanned: usize,
    /// Routing entries past their TTL that were removed
    pub entries_removed: usize,
    /// Buckets deleted because nothing was left in them
    pub buckets_deleted: usize,
}

/// Result of `routing_stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingStats {
    /// Chats with live routing entries
    pub active_chats: usize,
    /// Live routing entries across all chats
    pub indexed_messages: usize,
}
