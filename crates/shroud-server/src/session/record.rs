//! Session records, identifiers and store keys.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shroud_core::{Environment, ShroudError};

/// Prefix of primary ids
pub const PRIMARY_PREFIX: &str = "anon_";
/// Prefix of secondary ids
pub const SECONDARY_PREFIX: &str = "sec_";
/// Prefix of base ids
pub const BASE_PREFIX: &str = "base_";

/// Store key prefix of session records
pub(crate) const SESSION_KEY: &str = "session:";
const SECONDARY_KEY: &str = "secondary:";
const BASE_KEY: &str = "base:";
const AUDIT_KEY: &str = "audit:";

pub(crate) fn session_key(primary_id: &str) -> String {
    format!("{SESSION_KEY}{primary_id}")
}

pub(crate) fn secondary_key(secondary_id: &str) -> String {
    format!("{SECONDARY_KEY}{secondary_id}")
}

pub(crate) fn base_key(base_id: &str) -> String {
    format!("{BASE_KEY}{base_id}")
}

pub(crate) fn audit_key(new_secondary_id: &str) -> String {
    format!("{AUDIT_KEY}{new_secondary_id}")
}

/// `anon_` + 32 hex chars
pub(crate) fn new_primary_id<E: Environment>(env: &E) -> String {
    format!("{PRIMARY_PREFIX}{}", hex::encode(env.random_array::<16>()))
}

/// `sec_` + 32 hex chars
pub(crate) fn new_secondary_id<E: Environment>(env: &E) -> String {
    format!("{SECONDARY_PREFIX}{}", hex::encode(env.random_array::<16>()))
}

/// `base_` + 16 hex chars
pub(crate) fn new_base_id<E: Environment>(env: &E) -> String {
    format!("{BASE_PREFIX}{}", hex::encode(env.random_array::<8>()))
}

/// Short form of an id for logs.
///
/// Full identifiers never appear in logs.
pub fn redact(id: &str) -> &str {
    let end = id.char_indices().nth(9).map_or(id.len(), |(index, _)| index);
    &id[..end]
}

/// Salted, truncated hash of the client's fingerprint hint.
///
/// The salt is fresh per session and never stored, so the same device yields
/// unrelated hashes in different sessions.
pub(crate) fn fingerprint_hash<E: Environment>(env: &E, hint: Option<&str>) -> String {
    let mut salt = [0u8; 16];
    env.random_bytes(&mut salt);

    let digest = Sha256::new()
        .chain_update(salt)
        .chain_update(hint.unwrap_or_default().as_bytes())
        .finalize();

    hex::encode(&digest[..8])
}

/// Security posture requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    /// Default posture
    #[default]
    Standard,
    /// Elevated posture
    High,
    /// Strictest posture
    Maximum,
}

impl FromStr for SecurityLevel {
    type Err = ShroudError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(Self::Standard),
            "high" => Ok(Self::High),
            "maximum" => Ok(Self::Maximum),
            other => Err(ShroudError::Validation {
                field: "securityLevel",
                reason: format!("unknown level {other:?}"),
            }),
        }
    }
}

/// Client-provided input to session creation.
///
/// Nothing here is stored as given: the hint is only hashed with a
/// throwaway salt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSeed {
    /// Opaque device hint from the client
    pub fingerprint_hint: Option<String>,
    /// Requested security posture
    #[serde(default)]
    pub security_level: SecurityLevel,
}

/// Marker left on a session by an emergency invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyMark {
    /// When the invalidation happened (ms since epoch)
    pub invalidated_at: u64,
    /// Caller-supplied reason
    pub reason: String,
}

/// Server-side record of an anonymous session.
///
/// Timestamps are milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonymousSession {
    /// Stable id for the session lifetime
    pub primary_id: String,
    /// Current rotating id
    pub secondary_id: String,
    /// Stable analytics handle
    pub base_id: String,
    /// Creation time
    pub created: u64,
    /// Last access
    pub last_seen: u64,
    /// Last secondary id rotation (creation counts as one)
    pub last_rotated: u64,
    /// Rotations so far
    pub rotation_count: u32,
    /// Messages routed for this session
    pub message_count: u64,
    /// Chats and channels joined
    pub chat_count: u64,
    /// Salted hash of the device hint
    pub device_fingerprint_hash: String,
    /// Requested security posture
    pub security_level: SecurityLevel,
    /// Hard expiry
    pub expires_at: u64,
    /// Set once an emergency invalidation happened
    pub emergency: Option<EmergencyMark>,
}

impl AnonymousSession {
    /// Remaining lifetime in ms at `now`. Zero once expired.
    pub fn remaining_ms(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now)
    }

    /// Whether the session is under emergency invalidation.
    pub fn is_invalidated(&self) -> bool {
        self.emergency.is_some()
    }
}

/// Analytics summary stored under the base id.
///
/// Never contains the primary or secondary id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseSummary {
    /// Creation time
    pub created: u64,
    /// Requested security posture
    pub security_level: SecurityLevel,
}

/// What caused a rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationTrigger {
    /// Explicit `rotate_identifiers` call
    Manual,
    /// Background rotation sweep
    Scheduled,
    /// Emergency invalidation
    Emergency,
}

/// Audit entry written for every rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationAudit {
    /// Retired secondary id
    pub previous_secondary_id: String,
    /// Replacement secondary id
    pub new_secondary_id: String,
    /// Rotation time
    pub rotated_at: u64,
    /// Cause
    pub trigger: RotationTrigger,
}

/// Result of `create_session`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSession {
    /// Stable id
    pub primary_id: String,
    /// Initial rotating id
    pub secondary_id: String,
    /// Seconds until expiry
    pub expires_in: u64,
}

/// Result of `rotate_identifiers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotatedIdentifiers {
    /// Replacement secondary id
    pub new_secondary_id: String,
    /// Rotations so far
    pub rotation_count: u32,
}

/// Finding of `validate_security`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum SecurityIssue {
    /// Hard expiry passed; the session is not valid
    Expired,
    /// No access for longer than the inactivity threshold
    #[serde(rename_all = "camelCase")]
    Inactive {
        /// Idle time in ms
        idle_ms: u64,
    },
    /// Secondary id older than the rotation interval
    #[serde(rename_all = "camelCase")]
    RotationOverdue {
        /// Time since last rotation in ms
        since_rotation_ms: u64,
    },
    /// Message count above the abuse threshold
    #[serde(rename_all = "camelCase")]
    ExcessiveMessages {
        /// Messages routed
        message_count: u64,
    },
}

/// Result of `validate_security`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityReport {
    /// False only for hard failures (expiry)
    pub valid: bool,
    /// Every finding, hard or soft
    pub warnings: Vec<SecurityIssue>,
}

/// Result of `emergency_invalidate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyOutcome {
    /// Always true on success
    pub invalidated: bool,
    /// New hard expiry (ms since epoch)
    pub new_expiry: u64,
}

/// Activity counted by `record_activity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// A message was routed for the session
    MessageSent,
    /// The session joined a chat or channel
    ChatJoined,
}
