#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use shroud_core::Environment;

use super::{ExpiringStore, StorageError, Versioned};

/// In-memory expiring store for testing, simulation and the standalone daemon.
///
/// Expiry is driven by the environment's wall clock, so a simulated clock
/// expires entries without real waiting. Expired entries are dropped lazily
/// on access and in bulk by [`MemoryStore::purge_expired`].
///
/// Uses `lock().expect()` which will panic if the mutex is poisoned.
#[derive(Clone)]
pub struct MemoryStore<E: Environment> {
    env: E,
    inner: Arc<Mutex<MemoryStoreInner>>,
}

struct Entry {
    value: Vec<u8>,
    version: u64,
    expires_at_ms: u64,
}

struct MemoryStoreInner {
    /// Ordered so prefix scans are range queries
    entries: BTreeMap<String, Entry>,

    /// Last version handed out (global, so versions never repeat per key)
    last_version: u64,
}

impl MemoryStoreInner {
    fn live(&mut self, key: &str, now_ms: u64) -> Option<&Entry> {
        let expired = self.entries.get(key).is_some_and(|entry| entry.expires_at_ms <= now_ms);
        if expired {
            self.entries.remove(key);
        }
        self.entries.get(key)
    }

    fn write(&mut self, key: &str, value: &[u8], expires_at_ms: u64) -> u64 {
        self.last_version += 1;
        let version = self.last_version;
        self.entries
            .insert(key.to_string(), Entry { value: value.to_vec(), version, expires_at_ms });
        version
    }
}

impl<E: Environment> MemoryStore<E> {
    /// Create a new empty store driven by `env`'s clock.
    pub fn new(env: E) -> Self {
        Self {
            env,
            inner: Arc::new(Mutex::new(MemoryStoreInner {
                entries: BTreeMap::new(),
                last_version: 0,
            })),
        }
    }

    /// Number of live entries.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn len(&self) -> usize {
        let now = self.env.wall_clock_ms();
        let inner = self.inner.lock().expect("Mutex poisoned");
        inner.entries.values().filter(|entry| entry.expires_at_ms > now).count()
    }

    /// Whether the store holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry. Returns how many were dropped.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn purge_expired(&self) -> usize {
        let now = self.env.wall_clock_ms();
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.expires_at_ms > now);
        before - inner.entries.len()
    }

    fn expiry(&self, ttl: Duration) -> u64 {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        self.env.wall_clock_ms().saturating_add(ttl_ms)
    }
}

impl<E: Environment> ExpiringStore for MemoryStore<E> {
    #[allow(clippy::expect_used)]
    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<u64, StorageError> {
        let expires_at_ms = self.expiry(ttl);
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.write(key, value, expires_at_ms))
    }

    #[allow(clippy::expect_used)]
    fn get(&self, key: &str) -> Result<Option<Versioned>, StorageError> {
        let now = self.env.wall_clock_ms();
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        Ok(inner
            .live(key, now)
            .map(|entry| Versioned { value: entry.value.clone(), version: entry.version }))
    }

    #[allow(clippy::expect_used)]
    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<u64>,
        value: &[u8],
        ttl: Duration,
    ) -> Result<u64, StorageError> {
        let now = self.env.wall_clock_ms();
        let expires_at_ms = self.expiry(ttl);
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        let actual = inner.live(key, now).map(|entry| entry.version);
        if actual != expected {
            return Err(StorageError::Conflict { key: key.to_string(), expected, actual });
        }

        Ok(inner.write(key, value, expires_at_ms))
    }

    #[allow(clippy::expect_used)]
    fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let now = self.env.wall_clock_ms();
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        Ok(inner.entries.remove(key).is_some_and(|entry| entry.expires_at_ms > now))
    }

    #[allow(clippy::expect_used)]
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let now = self.env.wall_clock_ms();
        let inner = self.inner.lock().expect("Mutex poisoned");

        Ok(inner
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, entry)| entry.expires_at_ms > now)
            .map(|(key, _)| key.clone())
            .collect())
    }

    #[allow(clippy::expect_used)]
    fn delete_many(&self, keys: &[String]) -> Result<usize, StorageError> {
        let now = self.env.wall_clock_ms();
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        Ok(keys
            .iter()
            .filter_map(|key| inner.entries.remove(key))
            .filter(|entry| entry.expires_at_ms > now)
            .count())
    }

    #[allow(clippy::expect_used)]
    fn ttl(&self, key: &str) -> Result<Option<Duration>, StorageError> {
        let now = self.env.wall_clock_ms();
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        Ok(inner
            .live(key, now)
            .map(|entry| Duration::from_millis(entry.expires_at_ms.saturating_sub(now))))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    /// Minimal environment with a manually advanced wall clock.
    #[derive(Clone)]
    struct TestEnv {
        clock_ms: Arc<AtomicU64>,
    }

    impl TestEnv {
        fn new() -> Self {
            Self { clock_ms: Arc::new(AtomicU64::new(1_000_000)) }
        }

        fn advance(&self, duration: Duration) {
            self.clock_ms.fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
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
            buffer.fill(0x42);
        }
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn set_get_roundtrip() {
        let store = MemoryStore::new(TestEnv::new());
        let version = store.set("session:a", b"v1", HOUR).unwrap();

        let entry = store.get("session:a").unwrap().unwrap();
        assert_eq!(entry.value, b"v1");
        assert_eq!(entry.version, version);
    }

    #[test]
    fn entries_expire_with_clock() {
        let env = TestEnv::new();
        let store = MemoryStore::new(env.clone());
        store.set("k", b"v", Duration::from_secs(300)).unwrap();

        env.advance(Duration::from_secs(299));
        assert!(store.get("k").unwrap().is_some());
        assert_eq!(store.ttl("k").unwrap(), Some(Duration::from_secs(1)));

        env.advance(Duration::from_secs(1));
        assert!(store.get("k").unwrap().is_none());
        assert_eq!(store.ttl("k").unwrap(), None);
    }

    #[test]
    fn create_only_rejects_live_entry() {
        let store = MemoryStore::new(TestEnv::new());
        let version = store.compare_and_set("k", None, b"first", HOUR).unwrap();

        let result = store.compare_and_set("k", None, b"second", HOUR);
        assert_eq!(
            result,
            Err(StorageError::Conflict { key: "k".to_string(), expected: None, actual: Some(version) })
        );
        assert_eq!(store.get("k").unwrap().unwrap().value, b"first");
    }

    #[test]
    fn create_only_succeeds_after_expiry() {
        let env = TestEnv::new();
        let store = MemoryStore::new(env.clone());
        store.compare_and_set("k", None, b"first", Duration::from_secs(1)).unwrap();

        env.advance(Duration::from_secs(2));
        assert!(store.compare_and_set("k", None, b"second", HOUR).is_ok());
    }

    #[test]
    fn stale_version_conflicts() {
        let store = MemoryStore::new(TestEnv::new());
        let v1 = store.set("k", b"a", HOUR).unwrap();
        let v2 = store.compare_and_set("k", Some(v1), b"b", HOUR).unwrap();

        assert!(v2 > v1);
        assert!(store.compare_and_set("k", Some(v1), b"c", HOUR).unwrap_err().is_conflict());
    }

    #[test]
    fn versions_not_reused_after_delete() {
        let store = MemoryStore::new(TestEnv::new());
        let v1 = store.set("k", b"a", HOUR).unwrap();
        assert!(store.delete("k").unwrap());
        let v2 = store.set("k", b"a", HOUR).unwrap();

        assert_ne!(v1, v2);
        assert!(store.compare_and_set("k", Some(v1), b"b", HOUR).is_err());
    }

    #[test]
    fn scan_prefix_skips_other_and_expired_keys() {
        let env = TestEnv::new();
        let store = MemoryStore::new(env.clone());
        store.set("route:a", b"", HOUR).unwrap();
        store.set("route:b", b"", Duration::from_secs(1)).unwrap();
        store.set("session:x", b"", HOUR).unwrap();
        store.set("routf", b"", HOUR).unwrap();

        env.advance(Duration::from_secs(2));

        let keys = store.scan_prefix("route:").unwrap();
        assert_eq!(keys, vec!["route:a".to_string()]);
    }

    #[test]
    fn delete_many_counts_live_entries() {
        let store = MemoryStore::new(TestEnv::new());
        store.set("a", b"", HOUR).unwrap();
        store.set("b", b"", HOUR).unwrap();

        let removed = store
            .delete_many(&["a".to_string(), "b".to_string(), "missing".to_string()])
            .unwrap();
        assert_eq!(removed, 2);
        assert!(store.is_empty());
    }

    #[test]
    fn purge_drops_expired_entries() {
        let env = TestEnv::new();
        let store = MemoryStore::new(env.clone());
        store.set("short", b"", Duration::from_secs(1)).unwrap();
        store.set("long", b"", HOUR).unwrap();

        env.advance(Duration::from_secs(5));
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }
}
