//! Server configuration.
//!
//! Every limit and interval the session manager, router and sweeps use lives
//! here. Defaults match the documented protocol constants; the daemon
//! overrides a subset from the command line.

use std::time::Duration;

use crate::{retry::RetryPolicy, router::ScanPolicy};

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Top-level configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Session lifecycle settings
    pub session: SessionConfig,
    /// Message routing settings
    pub router: RouterConfig,
    /// Background sweep settings
    pub sweeps: SweepConfig,
    /// Store retry policy
    pub retry: RetryPolicy,
}

/// Session lifecycle settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Lifetime of a new session, extended on every access
    pub session_ttl: Duration,
    /// Age of a secondary id after which the sweep rotates it
    pub rotation_interval: Duration,
    /// Idle time after which `validate_security` warns
    pub inactivity_warning: Duration,
    /// Message count above which `validate_security` warns
    pub message_warning_threshold: u64,
    /// Rotations forced by an emergency invalidation
    pub emergency_rotations: u32,
    /// Remaining lifetime after an emergency invalidation
    pub emergency_ttl: Duration,
    /// Retention of rotation audit entries
    pub audit_ttl: Duration,
    /// Attempts to find an unused id before giving up
    pub max_id_attempts: u32,
    /// Attempts to win a compare-and-set race before giving up
    pub max_cas_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_ttl: DAY,
            rotation_interval: HOUR,
            inactivity_warning: 2 * HOUR,
            message_warning_threshold: 1000,
            emergency_rotations: 3,
            emergency_ttl: Duration::from_secs(300),
            audit_ttl: 7 * DAY,
            max_id_attempts: 4,
            max_cas_attempts: 8,
        }
    }
}

/// Message routing settings.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Largest accepted envelope (transport-encoded bytes)
    pub max_envelope_size: usize,
    /// Upper bound on `limit` for message listing
    pub max_page_size: usize,
    /// Messages older than this are never returned
    pub message_max_age: Duration,
    /// Lifetime of routing index entries
    pub routing_ttl: Duration,
    /// Span of one routing bucket; a chat's index is split into one bucket
    /// per window so an append never rewrites the whole history
    pub routing_window: Duration,
    /// Lifetime of anonymous channels
    pub channel_ttl: Duration,
    /// Delivery attempts per channel recipient
    pub delivery_attempts: u32,
    /// Field-name scan applied to message records
    pub scan_policy: ScanPolicy,
    /// Shortest accepted chat id (after stripping)
    pub min_chat_id_len: usize,
    /// Longest accepted chat id (after stripping)
    pub max_chat_id_len: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_envelope_size: 1024 * 1024,
            max_page_size: 100,
            message_max_age: 30 * DAY,
            routing_ttl: 7 * DAY,
            routing_window: HOUR,
            channel_ttl: 30 * DAY,
            delivery_attempts: 2,
            scan_policy: ScanPolicy::Strict,
            min_chat_id_len: 8,
            max_chat_id_len: 128,
        }
    }
}

/// Background sweep settings.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// How often the rotation sweep runs
    pub rotation_every: Duration,
    /// How often routing cleanup runs
    pub cleanup_every: Duration,
    /// Sessions rotated in parallel by one sweep
    pub rotation_concurrency: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            rotation_every: Duration::from_secs(10 * 60),
            cleanup_every: HOUR,
            rotation_concurrency: 16,
        }
    }
}

/// Convert a duration to whole milliseconds, saturating.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = ServerConfig::default();

        assert_eq!(config.session.session_ttl, Duration::from_secs(86_400));
        assert_eq!(config.session.emergency_ttl, Duration::from_secs(300));
        assert_eq!(config.session.emergency_rotations, 3);
        assert_eq!(config.router.max_envelope_size, 1_048_576);
        assert_eq!(config.router.max_page_size, 100);
        assert_eq!(config.router.scan_policy, ScanPolicy::Strict);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn millis_saturates() {
        assert_eq!(millis(Duration::from_secs(2)), 2000);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }
}
