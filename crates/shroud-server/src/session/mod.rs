//! Anonymous session lifecycle
//!
//! A session is addressed by two identifiers:
//!
//! - a stable primary id (`anon_…`) held by the client for the session's
//!   lifetime
//! - a rotating secondary id (`sec_…`) that is replaced periodically, on
//!   demand, and in bulk on emergency invalidation
//!
//! Store layout (all entries share the session's remaining lifetime):
//!
//! ```text
//! session:{primary}    → AnonymousSession
//! secondary:{secondary} → primary id
//! base:{base}          → BaseSummary
//! audit:{secondary}    → RotationAudit (7 days)
//! ```
//!
//! # Invariants
//!
//! - A secondary id resolves only while the session record names it. A
//!   retired mapping that has not been deleted yet resolves to `NotFound`.
//! - A rotation writes its new mapping before the session record, so the
//!   record never names a mapping that does not exist.
//! - Every write derives its TTL from the record's own `expires_at`, so once
//!   an emergency invalidation shortened it, no later write restores the
//!   long lifetime.

mod record;

use std::{sync::Arc, time::Duration};

use serde::{Serialize, de::DeserializeOwned};
use shroud_core::{Environment, ResourceKind, ShroudError};
use tokio::{sync::Semaphore, task::JoinSet};

pub use self::record::{
    Activity, AnonymousSession, BASE_PREFIX, BaseSummary, CreatedSession, EmergencyMark,
    EmergencyOutcome, PRIMARY_PREFIX, RotatedIdentifiers, RotationAudit, RotationTrigger,
    SECONDARY_PREFIX, SecurityIssue, SecurityLevel, SecurityReport, SessionSeed, redact,
};
use self::record::{
    SESSION_KEY, audit_key, base_key, fingerprint_hash, new_base_id, new_primary_id,
    new_secondary_id, secondary_key, session_key,
};
use crate::{
    config::{SessionConfig, millis},
    retry::RetryPolicy,
    storage::{ExpiringStore, StorageError, decode, encode},
};

/// Outcome of one rotation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotationSweepReport {
    /// Sessions examined
    pub scanned: usize,
    /// Sessions rotated
    pub rotated: usize,
    /// Sessions not due, or gone before they could be rotated
    pub skipped: usize,
    /// Sessions whose rotation failed
    pub failed: usize,
}

/// Session lifecycle manager.
///
/// Cheap to clone; clones share the store and configuration.
#[derive(Clone)]
pub struct SessionManager<E: Environment, S: ExpiringStore> {
    env: E,
    store: S,
    config: Arc<SessionConfig>,
    retry: RetryPolicy,
}

impl<E: Environment, S: ExpiringStore> SessionManager<E, S> {
    /// Create a manager over `store`.
    pub fn new(env: E, store: S, config: SessionConfig, retry: RetryPolicy) -> Self {
        Self { env, store, config: Arc::new(config), retry }
    }

    /// Session settings.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create a session and its three mappings.
    ///
    /// Ids are written create-only; a collision regenerates the id. If the
    /// session record cannot be written, the mappings already claimed are
    /// released.
    pub async fn create_session(&self, seed: SessionSeed) -> Result<CreatedSession, ShroudError> {
        let now = self.env.wall_clock_ms();
        let ttl = self.config.session_ttl;

        let summary = BaseSummary { created: now, security_level: seed.security_level };
        let (base_id, _) = self.claim(new_base_id, base_key, &summary, ttl).await?;

        // Claim the secondary mapping first, pointing at a provisional primary
        // id, so the session record never names a mapping that was not written
        let primary_id = new_primary_id(&self.env);
        let (secondary_id, mapping_version) =
            match self.claim(new_secondary_id, secondary_key, &primary_id, ttl).await {
                Ok(claimed) => claimed,
                Err(err) => {
                    self.discard(&base_key(&base_id)).await;
                    return Err(err);
                },
            };

        let session = AnonymousSession {
            primary_id,
            secondary_id: secondary_id.clone(),
            base_id: base_id.clone(),
            created: now,
            last_seen: now,
            last_rotated: now,
            rotation_count: 0,
            message_count: 0,
            chat_count: 0,
            device_fingerprint_hash: fingerprint_hash(&self.env, seed.fingerprint_hint.as_deref()),
            security_level: seed.security_level,
            expires_at: now.saturating_add(millis(ttl)),
            emergency: None,
        };

        match self.insert_session(session, mapping_version, ttl).await {
            Ok(primary_id) => {
                tracing::info!(session = redact(&primary_id), "session created");
                Ok(CreatedSession { primary_id, secondary_id, expires_in: ttl.as_secs() })
            },
            Err(err) => {
                self.discard(&secondary_key(&secondary_id)).await;
                self.discard(&base_key(&base_id)).await;
                Err(err)
            },
        }
    }

    /// Resolve a primary or secondary id and record the access.
    ///
    /// Refreshes `last_seen` and extends the lifetime to a full TTL from now,
    /// unless the session is under emergency invalidation.
    pub async fn get_session(&self, any_id: &str) -> Result<AnonymousSession, ShroudError> {
        let (mut session, mut version) = self.lookup_live(any_id).await?;

        for _ in 0..self.config.max_cas_attempts {
            let now = self.env.wall_clock_ms();
            session.last_seen = now;
            if !session.is_invalidated() {
                let extended = now.saturating_add(millis(self.config.session_ttl));
                session.expires_at = session.expires_at.max(extended);
            }

            let ttl = Duration::from_millis(session.remaining_ms(now));
            if !session.is_invalidated() {
                // Mappings first: outliving the record is harmless, the
                // reverse is not
                self.retime(&secondary_key(&session.secondary_id), ttl).await?;
                self.retime(&base_key(&session.base_id), ttl).await?;
            }

            match self.write(&session_key(&session.primary_id), Some(version), &session, ttl).await {
                Ok(_) => return Ok(session),
                Err(err) if err.is_conflict() => {
                    let primary_id = session.primary_id.clone();
                    (session, version) = self.load_live_session(&primary_id).await?;
                },
                Err(err) => return Err(err.into()),
            }
        }

        Err(exhausted(self.config.max_cas_attempts, "session refresh contention"))
    }

    /// Resolve a primary or secondary id without recording an access.
    pub async fn resolve(&self, any_id: &str) -> Result<AnonymousSession, ShroudError> {
        self.lookup_live(any_id).await.map(|(session, _)| session)
    }

    /// Issue a new secondary id and retire the current one.
    ///
    /// The old secondary id returns `NotFound` as soon as this returns.
    pub async fn rotate_identifiers(&self, primary_id: &str) -> Result<RotatedIdentifiers, ShroudError> {
        match self.rotate(primary_id, RotationTrigger::Manual, false).await? {
            Some(rotated) => Ok(rotated),
            None => Err(ShroudError::NotFound { kind: ResourceKind::Session }),
        }
    }

    /// Check a session's security posture.
    ///
    /// Only expiry makes the session invalid; the rest are warnings. Never
    /// modifies the session.
    pub async fn validate_security(&self, any_id: &str) -> Result<SecurityReport, ShroudError> {
        let (session, _) = self.lookup(any_id).await?;
        let now = self.env.wall_clock_ms();

        let mut warnings = Vec::new();
        let expired = session.expires_at <= now;
        if expired {
            warnings.push(SecurityIssue::Expired);
        }

        let idle_ms = now.saturating_sub(session.last_seen);
        if idle_ms > millis(self.config.inactivity_warning) {
            warnings.push(SecurityIssue::Inactive { idle_ms });
        }

        let since_rotation_ms = now.saturating_sub(session.last_rotated);
        if since_rotation_ms > millis(self.config.rotation_interval) {
            warnings.push(SecurityIssue::RotationOverdue { since_rotation_ms });
        }

        if session.message_count > self.config.message_warning_threshold {
            warnings.push(SecurityIssue::ExcessiveMessages { message_count: session.message_count });
        }

        Ok(SecurityReport { valid: !expired, warnings })
    }

    /// Burn a possibly leaked session.
    ///
    /// Shortens the remaining lifetime to the emergency TTL (never extends
    /// it), then forces several rotations so any leaked secondary id is
    /// useless.
    pub async fn emergency_invalidate(
        &self,
        primary_id: &str,
        reason: &str,
    ) -> Result<EmergencyOutcome, ShroudError> {
        let mut new_expiry = None;

        for _ in 0..self.config.max_cas_attempts {
            let (mut session, version) = self.load_live_session(primary_id).await?;
            let now = self.env.wall_clock_ms();

            let expiry =
                session.expires_at.min(now.saturating_add(millis(self.config.emergency_ttl)));
            session.expires_at = expiry;
            session.emergency =
                Some(EmergencyMark { invalidated_at: now, reason: reason.to_string() });

            let ttl = Duration::from_millis(session.remaining_ms(now));
            match self.write(&session_key(primary_id), Some(version), &session, ttl).await {
                Ok(_) => {
                    self.retime(&base_key(&session.base_id), ttl).await?;
                    new_expiry = Some(expiry);
                    break;
                },
                Err(err) if err.is_conflict() => continue,
                Err(err) => return Err(err.into()),
            }
        }

        let Some(new_expiry) = new_expiry else {
            return Err(exhausted(self.config.max_cas_attempts, "invalidation contention"));
        };

        for _ in 0..self.config.emergency_rotations {
            self.rotate(primary_id, RotationTrigger::Emergency, false).await?;
        }

        tracing::warn!(
            target: "shroud::security",
            session = redact(primary_id),
            reason,
            rotations = self.config.emergency_rotations,
            "emergency invalidation"
        );

        Ok(EmergencyOutcome { invalidated: true, new_expiry })
    }

    /// Explicit logout: delete the session and both mappings in one batch.
    pub async fn end_session(&self, primary_id: &str) -> Result<(), ShroudError> {
        let (session, _) = self.load_live_session(primary_id).await?;

        let keys = vec![
            session_key(&session.primary_id),
            secondary_key(&session.secondary_id),
            base_key(&session.base_id),
        ];
        self.retry.run(&self.env, || self.store.delete_many(&keys)).await?;

        tracing::info!(session = redact(primary_id), "session ended");
        Ok(())
    }

    /// Count an activity against the session.
    pub async fn record_activity(&self, primary_id: &str, activity: Activity) -> Result<(), ShroudError> {
        for _ in 0..self.config.max_cas_attempts {
            let (mut session, version) = self.load_live_session(primary_id).await?;
            match activity {
                Activity::MessageSent => session.message_count += 1,
                Activity::ChatJoined => session.chat_count += 1,
            }

            let ttl = Duration::from_millis(session.remaining_ms(self.env.wall_clock_ms()));
            match self.write(&session_key(primary_id), Some(version), &session, ttl).await {
                Ok(_) => return Ok(()),
                Err(err) if err.is_conflict() => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Err(exhausted(self.config.max_cas_attempts, "activity update contention"))
    }

    /// Rotate every session whose secondary id is older than the rotation
    /// interval.
    ///
    /// Due-ness is re-checked inside each rotation, so two overlapping sweeps
    /// rotate a session once.
    pub async fn rotate_due_sessions(&self, concurrency: usize) -> Result<RotationSweepReport, ShroudError> {
        let keys = self.retry.run(&self.env, || self.store.scan_prefix(SESSION_KEY)).await?;
        let mut report = RotationSweepReport { scanned: keys.len(), ..Default::default() };

        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for key in keys {
            let Some(primary_id) = key.strip_prefix(SESSION_KEY).map(str::to_string) else {
                continue;
            };
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };

            let manager = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                manager.rotate(&primary_id, RotationTrigger::Scheduled, true).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(Some(_))) => report.rotated += 1,
                Ok(Ok(None) | Err(ShroudError::NotFound { .. })) => report.skipped += 1,
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "scheduled rotation failed");
                    report.failed += 1;
                },
                Err(err) => {
                    tracing::error!(error = %err, "rotation task aborted");
                    report.failed += 1;
                },
            }
        }

        Ok(report)
    }

    /// Rotation core.
    ///
    /// Returns `None` when `only_if_due` is set and the session was rotated
    /// recently (possibly by a concurrent sweep).
    async fn rotate(
        &self,
        primary_id: &str,
        trigger: RotationTrigger,
        only_if_due: bool,
    ) -> Result<Option<RotatedIdentifiers>, ShroudError> {
        for _ in 0..self.config.max_cas_attempts {
            let (mut session, version) = self.load_live_session(primary_id).await?;
            let now = self.env.wall_clock_ms();

            if only_if_due
                && now.saturating_sub(session.last_rotated) < millis(self.config.rotation_interval)
            {
                return Ok(None);
            }

            let ttl = Duration::from_millis(session.remaining_ms(now));
            let (new_secondary_id, _) =
                self.claim(new_secondary_id, secondary_key, &session.primary_id, ttl).await?;

            let previous_secondary_id =
                std::mem::replace(&mut session.secondary_id, new_secondary_id.clone());
            session.rotation_count += 1;
            session.last_rotated = now;

            match self.write(&session_key(primary_id), Some(version), &session, ttl).await {
                Ok(_) => {},
                Err(err) => {
                    // Lost the race or the store failed: the pending mapping
                    // must not linger
                    self.discard(&secondary_key(&new_secondary_id)).await;
                    if err.is_conflict() {
                        continue;
                    }
                    return Err(err.into());
                },
            }

            self.discard(&secondary_key(&previous_secondary_id)).await;
            self.write_audit(RotationAudit {
                previous_secondary_id,
                new_secondary_id: new_secondary_id.clone(),
                rotated_at: now,
                trigger,
            })
            .await;

            tracing::info!(
                session = redact(primary_id),
                ?trigger,
                rotation_count = session.rotation_count,
                "identifiers rotated"
            );

            return Ok(Some(RotatedIdentifiers {
                new_secondary_id,
                rotation_count: session.rotation_count,
            }));
        }

        Err(exhausted(self.config.max_cas_attempts, "rotation contention"))
    }

    /// Write a new session record create-only, regenerating the primary id
    /// (and repointing the secondary mapping) on collision.
    async fn insert_session(
        &self,
        mut session: AnonymousSession,
        mut mapping_version: u64,
        ttl: Duration,
    ) -> Result<String, ShroudError> {
        for _ in 0..self.config.max_id_attempts {
            match self.write(&session_key(&session.primary_id), None, &session, ttl).await {
                Ok(_) => return Ok(session.primary_id),
                Err(err) if err.is_conflict() => {
                    tracing::debug!("primary id collision, regenerating");
                    session.primary_id = new_primary_id(&self.env);
                    mapping_version = self
                        .write(
                            &secondary_key(&session.secondary_id),
                            Some(mapping_version),
                            &session.primary_id,
                            ttl,
                        )
                        .await?;
                },
                Err(err) => return Err(err.into()),
            }
        }

        Err(exhausted(self.config.max_id_attempts, "no unused primary id"))
    }

    /// Resolve any id to its session record, including sessions whose hard
    /// expiry has passed but whose entry is still present.
    async fn lookup(&self, any_id: &str) -> Result<(AnonymousSession, u64), ShroudError> {
        if let Some(found) = self.read::<AnonymousSession>(&session_key(any_id)).await? {
            return Ok(found);
        }

        let Some((primary_id, _)) = self.read::<String>(&secondary_key(any_id)).await? else {
            return Err(ShroudError::NotFound { kind: ResourceKind::Session });
        };

        let Some((session, version)) = self.read::<AnonymousSession>(&session_key(&primary_id)).await?
        else {
            return Err(ShroudError::NotFound { kind: ResourceKind::Session });
        };

        // Retired mapping not yet deleted
        if session.secondary_id != any_id {
            return Err(ShroudError::NotFound { kind: ResourceKind::Session });
        }

        Ok((session, version))
    }

    async fn lookup_live(&self, any_id: &str) -> Result<(AnonymousSession, u64), ShroudError> {
        let (session, version) = self.lookup(any_id).await?;
        if session.expires_at <= self.env.wall_clock_ms() {
            return Err(ShroudError::NotFound { kind: ResourceKind::Session });
        }
        Ok((session, version))
    }

    async fn load_live_session(&self, primary_id: &str) -> Result<(AnonymousSession, u64), ShroudError> {
        let Some((session, version)) = self.read::<AnonymousSession>(&session_key(primary_id)).await?
        else {
            return Err(ShroudError::NotFound { kind: ResourceKind::Session });
        };
        if session.expires_at <= self.env.wall_clock_ms() {
            return Err(ShroudError::NotFound { kind: ResourceKind::Session });
        }
        Ok((session, version))
    }

    /// Write under a freshly generated id, regenerating on collision.
    async fn claim<T: Serialize>(
        &self,
        generate: impl Fn(&E) -> String,
        key_of: impl Fn(&str) -> String,
        value: &T,
        ttl: Duration,
    ) -> Result<(String, u64), ShroudError> {
        for _ in 0..self.config.max_id_attempts {
            let id = generate(&self.env);
            match self.write(&key_of(&id), None, value, ttl).await {
                Ok(version) => return Ok((id, version)),
                Err(err) if err.is_conflict() => {
                    tracing::debug!("identifier collision, regenerating");
                },
                Err(err) => return Err(err.into()),
            }
        }

        Err(exhausted(self.config.max_id_attempts, "no unused identifier"))
    }

    /// Re-write an entry unchanged with a new TTL.
    ///
    /// Skips silently if the entry is gone or changed underneath us.
    async fn retime(&self, key: &str, ttl: Duration) -> Result<(), ShroudError> {
        let Some(entry) = self.retry.run(&self.env, || self.store.get(key)).await? else {
            return Ok(());
        };

        let result = self
            .retry
            .run(&self.env, || self.store.compare_and_set(key, Some(entry.version), &entry.value, ttl))
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if err.is_conflict() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Best-effort delete. A leftover mapping never resolves and expires on
    /// its own.
    async fn discard(&self, key: &str) {
        if let Err(err) = self.retry.run(&self.env, || self.store.delete(key)).await {
            tracing::warn!(error = %err, "failed to delete mapping");
        }
    }

    async fn write_audit(&self, audit: RotationAudit) {
        let key = audit_key(&audit.new_secondary_id);
        let result = match encode(&audit) {
            Ok(bytes) => {
                self.retry
                    .run(&self.env, || self.store.set(&key, &bytes, self.config.audit_ttl))
                    .await
            },
            Err(err) => Err(err),
        };

        if let Err(err) = result {
            tracing::warn!(error = %err, "failed to write rotation audit");
        }
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<(T, u64)>, StorageError> {
        let entry = self.retry.run(&self.env, || self.store.get(key)).await?;
        entry.map(|entry| Ok((decode(&entry.value)?, entry.version))).transpose()
    }

    async fn write<T: Serialize>(
        &self,
        key: &str,
        expected: Option<u64>,
        value: &T,
        ttl: Duration,
    ) -> Result<u64, StorageError> {
        let bytes = encode(value)?;
        self.retry
            .run(&self.env, || self.store.compare_and_set(key, expected, &bytes, ttl))
            .await
    }
}

fn exhausted(attempts: u32, reason: &str) -> ShroudError {
    ShroudError::TransientStore { attempts, last_error: reason.to_string() }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    };

    use super::*;
    use crate::storage::MemoryStore;

    /// Manual clock, counter-based randomness.
    #[derive(Clone)]
    struct TestEnv {
        clock_ms: Arc<AtomicU64>,
        counter: Arc<Mutex<u64>>,
    }

    impl TestEnv {
        fn new() -> Self {
            Self { clock_ms: Arc::new(AtomicU64::new(1_700_000_000_000)), counter: Arc::default() }
        }

        fn advance(&self, duration: Duration) {
            self.clock_ms.fetch_add(millis(duration), Ordering::SeqCst);
        }
    }

    impl Environment for TestEnv {
        type Instant = Duration;

        fn now(&self) -> Self::Instant {
            Duration::from_millis(self.clock_ms.load(Ordering::SeqCst))
        }

        fn wall_clock_ms(&self) -> u64 {
            self.clock_ms.load(Ordering::SeqCst)
        }

        fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            self.advance(duration);
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            let mut counter = self.counter.lock().unwrap();
            for chunk in buffer.chunks_mut(8) {
                *counter += 1;
                chunk.copy_from_slice(&counter.to_be_bytes()[..chunk.len()]);
            }
        }
    }

    fn manager() -> (TestEnv, MemoryStore<TestEnv>, SessionManager<TestEnv, MemoryStore<TestEnv>>) {
        let env = TestEnv::new();
        let store = MemoryStore::new(env.clone());
        let manager = SessionManager::new(
            env.clone(),
            store.clone(),
            SessionConfig::default(),
            RetryPolicy::default(),
        );
        (env, store, manager)
    }

    #[tokio::test]
    async fn ids_have_documented_shape() {
        let (_, _, manager) = manager();
        let created = manager.create_session(SessionSeed::default()).await.unwrap();
        let session = manager.resolve(&created.primary_id).await.unwrap();

        assert!(created.primary_id.starts_with("anon_"));
        assert_eq!(created.primary_id.len(), 5 + 32);
        assert!(created.secondary_id.starts_with("sec_"));
        assert_eq!(created.secondary_id.len(), 4 + 32);
        assert!(session.base_id.starts_with("base_"));
        assert_eq!(session.base_id.len(), 5 + 16);
        assert_eq!(created.expires_in, 86_400);
    }

    #[tokio::test]
    async fn primary_collision_regenerates() {
        let (env, store, manager) = manager();

        // Counter randomness makes ids predictable: pre-claim the primary id
        // drawn right after the base id
        let probe = TestEnv { clock_ms: Arc::clone(&env.clock_ms), counter: Arc::new(Mutex::new(1)) };
        let taken = new_primary_id(&probe);
        store.set(&session_key(&taken), b"occupied", Duration::from_secs(60)).unwrap();

        let created = manager.create_session(SessionSeed::default()).await.unwrap();
        assert_ne!(created.primary_id, taken);

        let by_secondary = manager.resolve(&created.secondary_id).await.unwrap();
        assert_eq!(by_secondary.primary_id, created.primary_id);
    }

    #[tokio::test]
    async fn expired_record_reports_invalid() {
        let (env, store, manager) = manager();
        let created = manager.create_session(SessionSeed::default()).await.unwrap();

        // Record whose hard expiry passed while the entry is still stored
        let (mut session, _) = manager.lookup(&created.primary_id).await.unwrap();
        session.expires_at = env.wall_clock_ms() - 1;
        store
            .set(&session_key(&created.primary_id), &encode(&session).unwrap(), Duration::from_secs(60))
            .unwrap();

        let report = manager.validate_security(&created.primary_id).await.unwrap();
        assert!(!report.valid);
        assert_eq!(report.warnings.first(), Some(&SecurityIssue::Expired));

        assert_eq!(
            manager.get_session(&created.primary_id).await,
            Err(ShroudError::NotFound { kind: ResourceKind::Session })
        );
    }

    #[tokio::test]
    async fn rotation_writes_audit_without_primary_id() {
        let (_, store, manager) = manager();
        let created = manager.create_session(SessionSeed::default()).await.unwrap();
        let rotated = manager.rotate_identifiers(&created.primary_id).await.unwrap();

        let entry = store.get(&audit_key(&rotated.new_secondary_id)).unwrap().unwrap();
        let audit: RotationAudit = decode(&entry.value).unwrap();

        assert_eq!(audit.previous_secondary_id, created.secondary_id);
        assert_eq!(audit.trigger, RotationTrigger::Manual);
        assert_eq!(
            store.ttl(&audit_key(&rotated.new_secondary_id)).unwrap(),
            Some(Duration::from_secs(7 * 24 * 3600))
        );

        let json = serde_json::to_string(&audit).unwrap();
        assert!(!json.contains(&created.primary_id));
    }

    #[tokio::test]
    async fn retired_mapping_does_not_resolve_even_if_present() {
        let (_, store, manager) = manager();
        let created = manager.create_session(SessionSeed::default()).await.unwrap();
        manager.rotate_identifiers(&created.primary_id).await.unwrap();

        // Simulate a delete that never landed
        store
            .set(
                &secondary_key(&created.secondary_id),
                &encode(&created.primary_id).unwrap(),
                Duration::from_secs(60),
            )
            .unwrap();

        assert_eq!(
            manager.resolve(&created.secondary_id).await,
            Err(ShroudError::NotFound { kind: ResourceKind::Session })
        );
    }

    #[tokio::test]
    async fn access_slides_expiry() {
        let (env, store, manager) = manager();
        let created = manager.create_session(SessionSeed::default()).await.unwrap();

        env.advance(Duration::from_secs(20 * 3600));
        manager.get_session(&created.secondary_id).await.unwrap();

        assert_eq!(
            store.ttl(&session_key(&created.primary_id)).unwrap(),
            Some(Duration::from_secs(24 * 3600))
        );
        assert_eq!(
            store.ttl(&secondary_key(&created.secondary_id)).unwrap(),
            Some(Duration::from_secs(24 * 3600))
        );
    }

    /// Memory store that refuses every session record write.
    #[derive(Clone)]
    struct RejectSessionRecords(MemoryStore<TestEnv>);

    impl ExpiringStore for RejectSessionRecords {
        fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<u64, StorageError> {
            self.0.set(key, value, ttl)
        }

        fn get(&self, key: &str) -> Result<Option<crate::storage::Versioned>, StorageError> {
            self.0.get(key)
        }

        fn compare_and_set(
            &self,
            key: &str,
            expected: Option<u64>,
            value: &[u8],
            ttl: Duration,
        ) -> Result<u64, StorageError> {
            if key.starts_with(SESSION_KEY) {
                return Err(StorageError::Io("disk full".to_string()));
            }
            self.0.compare_and_set(key, expected, value, ttl)
        }

        fn delete(&self, key: &str) -> Result<bool, StorageError> {
            self.0.delete(key)
        }

        fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
            self.0.scan_prefix(prefix)
        }

        fn delete_many(&self, keys: &[String]) -> Result<usize, StorageError> {
            self.0.delete_many(keys)
        }

        fn ttl(&self, key: &str) -> Result<Option<Duration>, StorageError> {
            self.0.ttl(key)
        }
    }

    #[tokio::test]
    async fn failed_create_releases_claimed_mappings() {
        let env = TestEnv::new();
        let memory = MemoryStore::new(env.clone());
        let manager = SessionManager::new(
            env,
            RejectSessionRecords(memory.clone()),
            SessionConfig::default(),
            RetryPolicy::default(),
        );

        let result = manager.create_session(SessionSeed::default()).await;

        assert_eq!(
            result.map(|_| ()),
            Err(ShroudError::TransientStore {
                attempts: 3,
                last_error: "I/O error: disk full".to_string(),
            })
        );
        assert!(memory.is_empty());
    }
}
