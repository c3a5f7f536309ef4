//! TTL-bound result cache
//!
//! Entries are keyed by (tenant, resource class) and wrapped in an envelope
//! carrying the write timestamp. An entry is never returned once its age
//! reaches the TTL. Unreadable or mismatched entries are logged and treated
//! as misses, so a bad entry can only force a refresh.
//!
//! Concurrent writers to one key race with last-writer-wins. That is only
//! acceptable for idempotent snapshots such as verdict sets.

mod store;

pub use store::{CacheStore, FileCacheStore, MemoryCacheStore};

use crate::error::CacheError;
use crate::models::ResourceClass;
use crate::observability::ScanMetrics;
use chrono::{DateTime, TimeZone, Utc};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default cache TTL (1 hour)
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for simulated time
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        self.millis.store(to.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.millis.load(Ordering::SeqCst))
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// Cache key; tenants never share an entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub tenant_id: String,
    pub resource_class: ResourceClass,
}

impl CacheKey {
    pub fn new(tenant_id: impl Into<String>, resource_class: ResourceClass) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            resource_class,
        }
    }

    /// Stable hex digest of the key, used for storage names
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.tenant_id.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.resource_class.as_str().as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.resource_class)
    }
}

/// Persisted envelope: `{timestamp, data}` plus the key it was written for
#[derive(Debug, Serialize, Deserialize)]
struct CacheEnvelope<T> {
    /// Write time in epoch seconds
    timestamp: f64,
    tenant_id: String,
    resource_class: ResourceClass,
    data: T,
}

/// Freshness summary for one key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStatus {
    pub tenant_id: String,
    pub resource_class: ResourceClass,
    pub present: bool,
    pub fresh: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_secs: Option<u64>,
    pub ttl_secs: u64,
}

/// TTL-bound cache over a [`CacheStore`]
#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            clock: Arc::new(SystemClock),
        }
    }

    /// Cache backed by a process-local store
    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryCacheStore::new()), ttl)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn now_secs(&self) -> f64 {
        self.clock.now().timestamp_millis() as f64 / 1000.0
    }

    /// Read and validate an envelope; every failure mode is a logged miss
    fn load<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<CacheEnvelope<T>> {
        let bytes = match self.store.read(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                self.absorb(key, &e);
                return None;
            }
        };

        let envelope: CacheEnvelope<T> = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.absorb(key, &CacheError::Serialization(e));
                return None;
            }
        };

        if envelope.tenant_id != key.tenant_id || envelope.resource_class != key.resource_class {
            self.absorb(
                key,
                &CacheError::Corrupted(format!(
                    "entry belongs to {}/{}",
                    envelope.tenant_id, envelope.resource_class
                )),
            );
            return None;
        }

        if !envelope.timestamp.is_finite() {
            self.absorb(key, &CacheError::Corrupted("invalid timestamp".to_string()));
            return None;
        }

        Some(envelope)
    }

    fn absorb(&self, key: &CacheKey, error: &CacheError) {
        warn!(
            event = "cache_corrupted",
            key = %key,
            error = %error,
            "Unreadable cache entry treated as miss"
        );
        ScanMetrics::new().inc_cache_corruptions();
    }

    fn age_of(&self, timestamp: f64) -> Duration {
        // Timestamps are written with millisecond precision
        let written_ms = (timestamp * 1000.0).round() as i64;
        let now_ms = self.clock.now().timestamp_millis();
        Duration::from_millis(now_ms.saturating_sub(written_ms).max(0) as u64)
    }

    /// Age of the stored entry, `Duration::MAX` if absent or unreadable
    pub fn age(&self, key: &CacheKey) -> Duration {
        self.load::<IgnoredAny>(key)
            .map(|envelope| self.age_of(envelope.timestamp))
            .unwrap_or(Duration::MAX)
    }

    /// Whether a readable entry younger than the TTL exists
    pub fn is_fresh(&self, key: &CacheKey) -> bool {
        self.age(key) < self.ttl
    }

    /// Fresh payload for a key; stale, missing or corrupted entries are `None`
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        self.get_with_age(key).map(|(payload, _)| payload)
    }

    /// Fresh payload together with its age
    pub fn get_with_age<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<(T, Duration)> {
        let metrics = ScanMetrics::new();
        let Some(envelope) = self.load::<T>(key) else {
            metrics.inc_cache_misses();
            return None;
        };

        let age = self.age_of(envelope.timestamp);
        if age >= self.ttl {
            debug!(key = %key, age_secs = age.as_secs(), "Cache entry expired");
            metrics.inc_cache_misses();
            return None;
        }

        metrics.inc_cache_hits();
        Some((envelope.data, age))
    }

    /// Replace the entry for a key, timestamped now
    pub fn put<T: Serialize>(&self, key: &CacheKey, payload: &T) -> Result<(), CacheError> {
        let envelope = CacheEnvelope {
            timestamp: self.now_secs(),
            tenant_id: key.tenant_id.clone(),
            resource_class: key.resource_class,
            data: payload,
        };
        let bytes = serde_json::to_vec(&envelope)?;
        self.store.write(key, &bytes)?;
        debug!(key = %key, bytes = bytes.len(), "Cache entry stored");
        Ok(())
    }

    /// Drop the entry for a key
    pub fn clear(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.store.remove(key)?;
        debug!(key = %key, "Cache entry cleared");
        Ok(())
    }

    pub fn status(&self, key: &CacheKey) -> CacheStatus {
        let age = self.age(key);
        let present = age != Duration::MAX;
        CacheStatus {
            tenant_id: key.tenant_id.clone(),
            resource_class: key.resource_class,
            present,
            fresh: present && age < self.ttl,
            age_secs: present.then(|| age.as_secs()),
            ttl_secs: self.ttl.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TTL: Duration = Duration::from_secs(600);

    fn key(tenant: &str) -> CacheKey {
        CacheKey::new(tenant, ResourceClass::ComputeInstance)
    }

    fn manual_cache() -> (ResultCache, Arc<ManualClock>, Arc<MemoryCacheStore>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryCacheStore::new());
        let cache = ResultCache::new(store.clone(), TTL).with_clock(clock.clone());
        (cache, clock, store)
    }

    #[test]
    fn test_get_before_and_after_ttl() {
        let (cache, clock, _) = manual_cache();
        cache.put(&key("acme"), &vec!["i-1".to_string()]).unwrap();

        clock.advance(TTL - Duration::from_secs(1));
        assert_eq!(
            cache.get::<Vec<String>>(&key("acme")),
            Some(vec!["i-1".to_string()])
        );
        assert!(cache.is_fresh(&key("acme")));

        // Exactly at the TTL the entry is already stale
        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get::<Vec<String>>(&key("acme")), None);
        assert!(!cache.is_fresh(&key("acme")));
    }

    #[test]
    fn test_missing_entry() {
        let (cache, _, _) = manual_cache();
        assert_eq!(cache.get::<u32>(&key("nobody")), None);
        assert!(!cache.is_fresh(&key("nobody")));
        assert_eq!(cache.age(&key("nobody")), Duration::MAX);
    }

    #[test]
    fn test_age_tracks_clock() {
        let (cache, clock, _) = manual_cache();
        cache.put(&key("acme"), &1u32).unwrap();
        clock.advance(Duration::from_secs(42));
        assert_eq!(cache.age(&key("acme")).as_secs(), 42);

        let status = cache.status(&key("acme"));
        assert!(status.present);
        assert!(status.fresh);
        assert_eq!(status.age_secs, Some(42));
    }

    #[test]
    fn test_put_replaces_and_resets_timestamp() {
        let (cache, clock, _) = manual_cache();
        cache.put(&key("acme"), &1u32).unwrap();
        clock.advance(TTL);
        assert_eq!(cache.get::<u32>(&key("acme")), None);

        cache.put(&key("acme"), &2u32).unwrap();
        assert_eq!(cache.get::<u32>(&key("acme")), Some(2));
    }

    #[test]
    fn test_clear() {
        let (cache, _, _) = manual_cache();
        cache.put(&key("acme"), &1u32).unwrap();
        cache.clear(&key("acme")).unwrap();
        assert_eq!(cache.get::<u32>(&key("acme")), None);
        assert!(!cache.status(&key("acme")).present);
    }

    #[test]
    fn test_tenants_are_isolated() {
        let (cache, _, _) = manual_cache();
        cache.put(&key("tenant-a"), &"a-verdicts").unwrap();

        assert_eq!(cache.get::<String>(&key("tenant-b")), None);
        assert_eq!(
            cache.get::<String>(&key("tenant-a")),
            Some("a-verdicts".to_string())
        );
    }

    #[test]
    fn test_corrupted_entry_is_a_miss() {
        let (cache, _, store) = manual_cache();
        store.write(&key("acme"), b"{not json").unwrap();

        assert_eq!(cache.get::<u32>(&key("acme")), None);
        assert!(!cache.is_fresh(&key("acme")));
        assert_eq!(cache.age(&key("acme")), Duration::MAX);
    }

    #[test]
    fn test_payload_type_mismatch_is_a_miss() {
        let (cache, _, _) = manual_cache();
        cache.put(&key("acme"), &"text").unwrap();
        assert_eq!(cache.get::<Vec<u32>>(&key("acme")), None);
    }

    #[test]
    fn test_entry_written_for_another_key_is_rejected() {
        let (cache, _, store) = manual_cache();
        cache.put(&key("tenant-a"), &7u32).unwrap();

        // Simulate a misplaced file: tenant-a's envelope under tenant-b's key
        let bytes = store.read(&key("tenant-a")).unwrap().unwrap();
        store.write(&key("tenant-b"), &bytes).unwrap();

        assert_eq!(cache.get::<u32>(&key("tenant-b")), None);
    }

    #[test]
    fn test_envelope_layout() {
        let (cache, _, store) = manual_cache();
        cache.put(&key("acme"), &vec![1, 2]).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&store.read(&key("acme")).unwrap().unwrap()).unwrap();
        assert!(raw["timestamp"].is_f64());
        assert_eq!(raw["data"], serde_json::json!([1, 2]));
        assert_eq!(raw["tenant_id"], "acme");
    }

    #[test]
    fn test_file_backed_cache_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let first = ResultCache::new(Arc::new(FileCacheStore::new(temp_dir.path()).unwrap()), TTL);
        first.put(&key("acme"), &vec!["i-9".to_string()]).unwrap();

        let reopened =
            ResultCache::new(Arc::new(FileCacheStore::new(temp_dir.path()).unwrap()), TTL);
        assert_eq!(
            reopened.get::<Vec<String>>(&key("acme")),
            Some(vec!["i-9".to_string()])
        );
    }

    #[test]
    fn test_truncated_file_is_a_miss() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(FileCacheStore::new(temp_dir.path()).unwrap());
        let cache = ResultCache::new(store.clone(), TTL);

        cache.put(&key("acme"), &vec![1u32; 64]).unwrap();
        let path = store.entry_path(&key("acme"));
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        assert_eq!(cache.get::<Vec<u32>>(&key("acme")), None);
    }
}
