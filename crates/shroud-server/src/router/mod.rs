//! Metadata-stripping message router
//!
//! Accepts opaque envelopes from validated sessions, persists them as
//! minimal message records, keeps an ephemeral per-chat routing index and
//! fans envelopes out through anonymous channels.
//!
//! # Leakage
//!
//! Every record is scanned ([`strip_and_verify`]) before it is persisted and
//! again after it is read back. A record failing the read-time scan (for
//! example one written to the message store by something other than this
//! router) is dropped from the result and logged as a security event; the
//! rest of the page is still returned.
//!
//! # Store layout
//!
//! ```text
//! route:{chat}:{window} → RoutingBucket (TTL refreshed on every append)
//! channel:{chan}        → AnonymousChannel (30 days)
//! ```

mod leakage;
mod record;

use std::{collections::HashSet, sync::Arc, time::Duration};

use shroud_core::{Environment, ResourceKind, ShroudError};

pub use self::{
    leakage::{ALLOWED_FIELDS, ScanPolicy, find_leak, is_forbidden, strip_and_verify, tokenize},
    record::{
        AnonymousChannel, CHANNEL_PREFIX, ChannelCreated, ChannelDelivery, CleanupReport,
        MESSAGE_PREFIX, MessageRecord, MessageType, RouteOptions, RoutedMessage, RoutingRecord,
        RoutingStats,
    },
};
use self::record::{
    ROUTE_KEY, RoutingBucket, channel_key, new_channel_id, new_message_id, route_key,
};
use crate::{
    config::{RouterConfig, millis},
    delivery::Delivery,
    retry::RetryPolicy,
    session::{Activity, SessionManager, redact},
    storage::{ExpiringStore, MessageStore, decode, encode},
};

/// Message router.
///
/// Cheap to clone; clones share stores, delivery and configuration.
#[derive(Clone)]
pub struct Router<E, S, M, D>
where
    E: Environment,
    S: ExpiringStore,
    M: MessageStore,
    D: Delivery,
{
    env: E,
    sessions: SessionManager<E, S>,
    routing: S,
    messages: M,
    delivery: D,
    config: Arc<RouterConfig>,
    retry: RetryPolicy,
}

impl<E, S, M, D> Router<E, S, M, D>
where
    E: Environment,
    S: ExpiringStore,
    M: MessageStore,
    D: Delivery,
{
    /// Create a router.
    ///
    /// `routing` holds routing buckets and channels; it may be the same store
    /// the session manager uses.
    pub fn new(
        env: E,
        sessions: SessionManager<E, S>,
        routing: S,
        messages: M,
        delivery: D,
        config: RouterConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self { env, sessions, routing, messages, delivery, config: Arc::new(config), retry }
    }

    /// Routing settings.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Persist an envelope for a chat on behalf of a session.
    ///
    /// The record is scanned before it is written; on `LeakageDetected`
    /// nothing is persisted.
    ///
    /// # Errors
    ///
    /// - `Validation`: bad chat id, empty or non-transport-encoded envelope
    /// - `CapacityExceeded`: envelope over the configured limit
    /// - `NotFound`: sender session unknown or expired
    /// - `LeakageDetected`: an extension field failed the scan
    /// - `TransientStore`: message store unavailable
    pub async fn route_message(
        &self,
        envelope: &str,
        chat_id: &str,
        sender_session_id: &str,
        options: RouteOptions,
    ) -> Result<RoutedMessage, ShroudError> {
        let chat_id = self.sanitize_chat_id(chat_id)?;
        self.check_envelope(envelope)?;
        let sender = self.sessions.get_session(sender_session_id).await?;

        let now = self.env.wall_clock_ms();
        let message_id = new_message_id(&self.env);
        let record = MessageRecord {
            id: message_id.clone(),
            chat_id: chat_id.clone(),
            encrypted_content: envelope.to_string(),
            message_type: options.message_type,
            timestamp: now,
            size: envelope.len(),
            extensions: options.extensions,
        };

        let value = record.to_value()?;
        strip_and_verify(&value, self.config.scan_policy)?;

        let metadata = MessageRecord::metadata(value);
        self.retry
            .run(&self.env, || self.messages.store_message(&message_id, envelope, &chat_id, &metadata))
            .await?;

        // The message is persisted; index and counter failures only cost
        // statistics
        if let Err(err) = self.update_routing_table(&chat_id, &message_id).await {
            tracing::warn!(message = redact(&message_id), error = %err, "routing index update failed");
        }
        if let Err(err) = self.sessions.record_activity(&sender.primary_id, Activity::MessageSent).await
        {
            tracing::warn!(session = redact(&sender.primary_id), error = %err, "activity update failed");
        }

        tracing::debug!(message = redact(&message_id), size = envelope.len(), "message routed");

        Ok(RoutedMessage { message_id, routed: true, timestamp: now })
    }

    /// Append a routing index entry to the chat's bucket for the current
    /// window.
    ///
    /// Compare-and-set loop, so concurrent appends to one chat never lose an
    /// entry. Expired entries are pruned on the way.
    pub async fn update_routing_table(&self, chat_id: &str, message_id: &str) -> Result<(), ShroudError> {
        let attempts = self.sessions.config().max_cas_attempts;
        let window_ms = millis(self.config.routing_window);

        for _ in 0..attempts {
            let now = self.env.wall_clock_ms();
            let key = route_key(chat_id, now, window_ms);
            let current = self.retry.run(&self.env, || self.routing.get(&key)).await?;
            let (mut bucket, expected) = match current {
                Some(entry) => (decode::<RoutingBucket>(&entry.value)?, Some(entry.version)),
                None => (RoutingBucket::default(), None),
            };

            bucket.prune(now.saturating_sub(millis(self.config.routing_ttl)));
            bucket.entries.push(RoutingRecord {
                message_id: message_id.to_string(),
                chat_id: chat_id.to_string(),
                routed_at: now,
                hop_count: 0,
            });

            let bytes = encode(&bucket)?;
            let ttl = self.config.routing_ttl;
            match self
                .retry
                .run(&self.env, || self.routing.compare_and_set(&key, expected, &bytes, ttl))
                .await
            {
                Ok(_) => return Ok(()),
                Err(err) if err.is_conflict() => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Err(ShroudError::TransientStore {
            attempts,
            last_error: "routing index contention".to_string(),
        })
    }

    /// A page of a chat's messages, newest first.
    ///
    /// `limit` is clamped to the configured page size. Every record is
    /// re-scanned and age-checked; failing records are left out.
    pub async fn get_chat_messages(
        &self,
        chat_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MessageRecord>, ShroudError> {
        let chat_id = self.sanitize_chat_id(chat_id)?;
        let limit = limit.min(self.config.max_page_size);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let stored = self
            .retry
            .run(&self.env, || self.messages.get_chat_messages(&chat_id, limit, offset))
            .await?;

        let cutoff = self.env.wall_clock_ms().saturating_sub(millis(self.config.message_max_age));
        let records = stored
            .into_iter()
            .filter_map(|stored| {
                let message_id = stored.id.clone();
                let value = MessageRecord::reassemble(stored);

                if strip_and_verify(&value, self.config.scan_policy).is_err() {
                    tracing::warn!(
                        target: "shroud::security",
                        message = redact(&message_id),
                        "stored record failed leakage scan, dropped"
                    );
                    return None;
                }

                match serde_json::from_value::<MessageRecord>(value) {
                    Ok(record) if record.timestamp > cutoff => Some(record),
                    Ok(_) => {
                        tracing::debug!(message = redact(&message_id), "record past maximum age");
                        None
                    },
                    Err(err) => {
                        tracing::warn!(
                            target: "shroud::security",
                            message = redact(&message_id),
                            error = %err,
                            "malformed stored record, dropped"
                        );
                        None
                    },
                }
            })
            .collect();

        Ok(records)
    }

    /// Create a fan-out group of at least two distinct sessions.
    ///
    /// Participants may be given by primary or secondary id; they are stored
    /// by primary id.
    pub async fn create_anonymous_channel(
        &self,
        participant_session_ids: &[String],
    ) -> Result<ChannelCreated, ShroudError> {
        let mut participants: Vec<String> = Vec::new();
        for id in participant_session_ids {
            let session = self.sessions.resolve(id).await?;
            if !participants.contains(&session.primary_id) {
                participants.push(session.primary_id);
            }
        }

        if participants.len() < 2 {
            return Err(ShroudError::Validation {
                field: "participants",
                reason: "at least two distinct sessions required".to_string(),
            });
        }

        let mut channel = AnonymousChannel {
            channel_id: String::new(),
            participants,
            created: self.env.wall_clock_ms(),
        };

        let attempts = self.sessions.config().max_id_attempts;
        for _ in 0..attempts {
            channel.channel_id = new_channel_id(&self.env);
            let key = channel_key(&channel.channel_id);
            let bytes = encode(&channel)?;
            let ttl = self.config.channel_ttl;

            match self
                .retry
                .run(&self.env, || self.routing.compare_and_set(&key, None, &bytes, ttl))
                .await
            {
                Ok(_) => {
                    for participant in &channel.participants {
                        if let Err(err) =
                            self.sessions.record_activity(participant, Activity::ChatJoined).await
                        {
                            tracing::warn!(session = redact(participant), error = %err, "activity update failed");
                        }
                    }

                    tracing::info!(
                        channel = redact(&channel.channel_id),
                        participants = channel.participants.len(),
                        "channel created"
                    );
                    return Ok(ChannelCreated {
                        participant_count: channel.participants.len(),
                        channel_id: channel.channel_id,
                    });
                },
                Err(err) if err.is_conflict() => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Err(ShroudError::TransientStore { attempts, last_error: "no unused channel id".to_string() })
    }

    /// Deliver an envelope to every channel participant except the sender.
    ///
    /// Each recipient is attempted independently; a failing recipient never
    /// stops delivery to the others.
    ///
    /// # Errors
    ///
    /// - `NotFound`: channel unknown, or sender not a participant
    /// - `NoRecipients`: no recipient accepted the envelope
    pub async fn route_through_channel(
        &self,
        channel_id: &str,
        envelope: &str,
        sender_session_id: &str,
    ) -> Result<ChannelDelivery, ShroudError> {
        self.check_envelope(envelope)?;

        let key = channel_key(channel_id);
        let Some(entry) = self.retry.run(&self.env, || self.routing.get(&key)).await? else {
            return Err(ShroudError::NotFound { kind: ResourceKind::Channel });
        };
        let channel: AnonymousChannel = decode(&entry.value)?;

        let sender = self.sessions.resolve(sender_session_id).await?;
        if !channel.participants.contains(&sender.primary_id) {
            return Err(ShroudError::NotFound { kind: ResourceKind::Channel });
        }

        let mut recipient_count = 0;
        for recipient in &channel.participants {
            if *recipient == sender.primary_id {
                continue;
            }
            if self.deliver_with_retry(recipient, channel_id, envelope).await {
                recipient_count += 1;
            }
        }

        if recipient_count == 0 {
            return Err(ShroudError::NoRecipients);
        }

        tracing::debug!(channel = redact(channel_id), recipient_count, "channel fan-out");
        Ok(ChannelDelivery { routed: true, recipient_count })
    }

    async fn deliver_with_retry(&self, recipient: &str, channel_id: &str, envelope: &str) -> bool {
        let attempts = self.config.delivery_attempts.max(1);

        for attempt in 1..=attempts {
            match self.delivery.deliver(recipient, channel_id, envelope) {
                Ok(()) => return true,
                Err(err) if err.is_transient() && attempt < attempts => {
                    tracing::debug!(recipient = redact(recipient), attempt, error = %err, "delivery failed, retrying");
                    self.env.sleep(self.retry.backoff(attempt)).await;
                },
                Err(err) => {
                    tracing::warn!(recipient = redact(recipient), error = %err, "delivery failed");
                    return false;
                },
            }
        }

        false
    }

    /// Prune routing entries past their TTL and delete emptied buckets.
    pub async fn cleanup_routing_data(&self) -> Result<CleanupReport, ShroudError> {
        let keys = self.retry.run(&self.env, || self.routing.scan_prefix(ROUTE_KEY)).await?;
        let mut report = CleanupReport { buckets_scanned: keys.len(), ..Default::default() };
        let mut emptied = Vec::new();

        for key in keys {
            let now = self.env.wall_clock_ms();
            let Some(entry) = self.retry.run(&self.env, || self.routing.get(&key)).await? else {
                continue;
            };
            let mut bucket: RoutingBucket = decode(&entry.value)?;

            let routing_ttl = millis(self.config.routing_ttl);
            let removed = bucket.prune(now.saturating_sub(routing_ttl));
            if removed == 0 {
                continue;
            }

            let Some(newest) = bucket.newest() else {
                emptied.push((key, entry.version));
                report.entries_removed += removed;
                continue;
            };

            let ttl = Duration::from_millis(newest.saturating_add(routing_ttl).saturating_sub(now));
            let bytes = encode(&bucket)?;
            match self
                .retry
                .run(&self.env, || self.routing.compare_and_set(&key, Some(entry.version), &bytes, ttl))
                .await
            {
                Ok(_) => report.entries_removed += removed,
                // A concurrent append rewrote the bucket; the next sweep prunes it
                Err(err) if err.is_conflict() => {},
                Err(err) => return Err(err.into()),
            }
        }

        // Skip buckets that received an append since they were read
        let mut doomed = Vec::new();
        for (key, version) in emptied {
            let current = self.retry.run(&self.env, || self.routing.get(&key)).await?;
            if current.is_some_and(|entry| entry.version == version) {
                doomed.push(key);
            }
        }
        if !doomed.is_empty() {
            report.buckets_deleted =
                self.retry.run(&self.env, || self.routing.delete_many(&doomed)).await?;
        }

        tracing::info!(
            buckets = report.buckets_scanned,
            removed = report.entries_removed,
            deleted = report.buckets_deleted,
            "routing cleanup finished"
        );
        Ok(report)
    }

    /// Chats with live routing entries, and the entry count across windows.
    pub async fn routing_stats(&self) -> Result<RoutingStats, ShroudError> {
        let keys = self.retry.run(&self.env, || self.routing.scan_prefix(ROUTE_KEY)).await?;
        let cutoff = self.env.wall_clock_ms().saturating_sub(millis(self.config.routing_ttl));

        let mut chats = HashSet::new();
        let mut indexed_messages = 0;
        for key in keys {
            let Some(entry) = self.retry.run(&self.env, || self.routing.get(&key)).await? else {
                continue;
            };
            let bucket: RoutingBucket = decode(&entry.value)?;
            for record in bucket.entries.into_iter().filter(|record| record.routed_at > cutoff) {
                indexed_messages += 1;
                chats.insert(record.chat_id);
            }
        }

        Ok(RoutingStats { active_chats: chats.len(), indexed_messages })
    }

    /// Strip a chat id to `[A-Za-z0-9_-]` and check its length.
    fn sanitize_chat_id(&self, chat_id: &str) -> Result<String, ShroudError> {
        let stripped: String = chat_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect();

        if !(self.config.min_chat_id_len..=self.config.max_chat_id_len).contains(&stripped.len()) {
            return Err(ShroudError::Validation {
                field: "chatId",
                reason: format!(
                    "must be {}..={} characters of [A-Za-z0-9_-]",
                    self.config.min_chat_id_len, self.config.max_chat_id_len
                ),
            });
        }

        Ok(stripped)
    }

    /// Envelopes are opaque, but must be non-empty, within the size limit and
    /// in transport encoding (unpadded URL-safe base64).
    fn check_envelope(&self, envelope: &str) -> Result<(), ShroudError> {
        if envelope.is_empty() {
            return Err(ShroudError::Validation { field: "envelope", reason: "empty".to_string() });
        }

        if envelope.len() > self.config.max_envelope_size {
            return Err(ShroudError::CapacityExceeded {
                size: envelope.len() as u64,
                limit: self.config.max_envelope_size as u64,
            });
        }

        let transport_encoded =
            envelope.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !transport_encoded {
            return Err(ShroudError::Validation {
                field: "envelope",
                reason: "not in transport encoding".to_string(),
            });
        }

        Ok(())
    }
}
