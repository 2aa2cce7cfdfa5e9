//! Two-tier existence cache for deduplicating submissions.
//!
//! The durable tier (optional) is consulted first and is the source of truth
//! across restarts and instances. The in-process [`MemoryTier`] is always
//! written and answers whenever the durable tier misses, is absent, or is
//! unavailable. Durable failures are logged and never surfaced to callers.

pub mod cloudflare_kv;
pub mod config;
pub mod durable;
pub mod identity;
pub mod memory;
pub mod metrics_defs;

use crate::cloudflare_kv::CloudflareKvStore;
use crate::config::{DedupConfig, DurableStoreConfig};
use crate::durable::{DurableStore, FilesystemStore, StoreError};
use crate::identity::SubmissionIdentity;
use crate::memory::MemoryTier;
use crate::metrics_defs::{
    DEDUP_CACHE_HIT, DEDUP_CACHE_MISS, DURABLE_TIER_ERRORS, MEMORY_TIER_ENTRIES,
    MEMORY_TIER_EVICTIONS,
};
use chrono::{DateTime, Duration, Utc};
use shared::{counter, gauge};
use std::future::Future;
use std::sync::Arc;

/// Length of the dedup window.
pub const DEDUP_TTL_SECS: i64 = 24 * 60 * 60;

const DURABLE_KEY_PREFIX: &str = "dedup:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Durable,
    Memory,
}

impl Tier {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Tier::Durable => "durable",
            Tier::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Duplicate {
        recorded_at: DateTime<Utc>,
        tier: Tier,
    },
    Miss,
}

impl CacheLookup {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, CacheLookup::Duplicate { .. })
    }

    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        match self {
            CacheLookup::Duplicate { recorded_at, .. } => Some(*recorded_at),
            CacheLookup::Miss => None,
        }
    }
}

/// Outcome of a durable tier call. `Unavailable` means the call failed or
/// timed out and the caller must fall back to the in-process tier.
#[derive(Debug, PartialEq, Eq)]
pub enum TierResult<T> {
    Ok(T),
    Unavailable,
}

pub struct DedupCache {
    durable: Option<Arc<dyn DurableStore>>,
    memory: MemoryTier,
    durable_timeout: std::time::Duration,
}

impl DedupCache {
    pub fn new(
        durable: Option<Arc<dyn DurableStore>>,
        durable_timeout: std::time::Duration,
    ) -> Self {
        DedupCache {
            durable,
            memory: MemoryTier::new(Duration::seconds(DEDUP_TTL_SECS)),
            durable_timeout,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None, std::time::Duration::ZERO)
    }

    pub fn from_config(config: &DedupConfig) -> Result<Self, StoreError> {
        let durable = match &config.durable_store {
            Some(store_config) => Some(get_store(store_config)?),
            None => None,
        };

        Ok(Self::new(
            durable,
            std::time::Duration::from_millis(config.durable_timeout_ms),
        ))
    }

    pub fn has_durable_tier(&self) -> bool {
        self.durable.is_some()
    }

    pub fn memory_tier(&self) -> &MemoryTier {
        &self.memory
    }

    pub async fn exists(&self, key: &SubmissionIdentity) -> CacheLookup {
        self.exists_at(key, Utc::now()).await
    }

    pub async fn exists_at(&self, key: &SubmissionIdentity, now: DateTime<Utc>) -> CacheLookup {
        if let Some(store) = &self.durable
            && let TierResult::Ok(Some(recorded_at)) = self
                .call_durable("get", store.get(&durable_key(key)))
                .await
        {
            return hit(recorded_at, Tier::Durable);
        }

        match self.memory.lookup(key, now) {
            Some(recorded_at) => hit(recorded_at, Tier::Memory),
            None => {
                counter!(DEDUP_CACHE_MISS).increment(1);
                CacheLookup::Miss
            }
        }
    }

    pub async fn record(&self, key: &SubmissionIdentity) {
        self.record_at(key, Utc::now()).await
    }

    pub async fn record_at(&self, key: &SubmissionIdentity, now: DateTime<Utc>) {
        if let Some(store) = &self.durable {
            let ttl = Duration::seconds(DEDUP_TTL_SECS);
            // Failures are already logged; the in-process write below still happens.
            let _ = self
                .call_durable("put", store.put(&durable_key(key), now, ttl))
                .await;
        }

        let evicted = self.memory.record(key.clone(), now);
        if evicted > 0 {
            tracing::debug!(evicted, "Pruned in-process dedup tier");
            counter!(MEMORY_TIER_EVICTIONS).increment(evicted as u64);
        }
        gauge!(MEMORY_TIER_ENTRIES).set(self.memory.len() as f64);
    }

    async fn call_durable<T, F>(&self, op: &'static str, call: F) -> TierResult<T>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let result = tokio::time::timeout(self.durable_timeout, call)
            .await
            .unwrap_or(Err(StoreError::Timeout(self.durable_timeout)));

        match result {
            Ok(value) => TierResult::Ok(value),
            Err(e) => {
                tracing::warn!(
                    op,
                    error = %e,
                    "Durable dedup tier unavailable, falling back to in-process tier"
                );
                counter!(DURABLE_TIER_ERRORS, "op" => op).increment(1);
                TierResult::Unavailable
            }
        }
    }
}

fn hit(recorded_at: DateTime<Utc>, tier: Tier) -> CacheLookup {
    counter!(DEDUP_CACHE_HIT, "tier" => tier.as_str()).increment(1);
    CacheLookup::Duplicate { recorded_at, tier }
}

fn durable_key(key: &SubmissionIdentity) -> String {
    format!("{DURABLE_KEY_PREFIX}{key}")
}

pub fn get_store(config: &DurableStoreConfig) -> Result<Arc<dyn DurableStore>, StoreError> {
    let store: Arc<dyn DurableStore> = match config {
        DurableStoreConfig::Filesystem { path } => Arc::new(FilesystemStore::new(path)),
        DurableStoreConfig::CloudflareKv {
            account_id,
            namespace_id,
            api_token,
            api_url,
        } => Arc::new(CloudflareKvStore::new(
            api_url,
            account_id,
            namespace_id,
            api_token.clone(),
        )?),
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::normalize;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Durable store whose reads and writes can be switched to fail.
    #[derive(Default)]
    struct FlakyStore {
        values: Mutex<HashMap<String, DateTime<Utc>>>,
        fail_get: bool,
        fail_put: bool,
        hang: bool,
        puts: AtomicUsize,
    }

    #[async_trait]
    impl DurableStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail_get {
                return Err(StoreError::InvalidValue("read failure".into()));
            }
            Ok(self.values.lock().get(key).copied())
        }

        async fn put(
            &self,
            key: &str,
            recorded_at: DateTime<Utc>,
            _ttl: Duration,
        ) -> Result<(), StoreError> {
            self.puts.fetch_add(1, Ordering::Relaxed);
            if self.fail_put {
                return Err(StoreError::InvalidValue("write failure".into()));
            }
            self.values.lock().insert(key.to_string(), recorded_at);
            Ok(())
        }
    }

    fn cache_with(store: Arc<FlakyStore>) -> DedupCache {
        DedupCache::new(Some(store), std::time::Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_in_memory_only() {
        let cache = DedupCache::in_memory();
        let key = normalize("jane@x.com");
        assert!(!cache.has_durable_tier());

        assert_eq!(cache.exists(&key).await, CacheLookup::Miss);
        cache.record(&key).await;

        let lookup = cache.exists(&normalize(" JANE@X.COM ")).await;
        assert!(lookup.is_duplicate());
        assert!(matches!(
            lookup,
            CacheLookup::Duplicate {
                tier: Tier::Memory,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_memory_entry_expires_lazily() {
        let cache = DedupCache::in_memory();
        let key = normalize("jane@x.com");
        let t0 = Utc::now();
        cache.record_at(&key, t0).await;

        let lookup = cache.exists_at(&key, t0 + Duration::hours(23)).await;
        assert_eq!(lookup.recorded_at(), Some(t0));

        let lookup = cache.exists_at(&key, t0 + Duration::hours(24)).await;
        assert_eq!(lookup, CacheLookup::Miss);
        assert!(cache.memory_tier().is_empty());
    }

    #[tokio::test]
    async fn test_durable_tier_is_consulted_first() {
        let store = Arc::new(FlakyStore::default());
        let recorded_at = Utc::now() - Duration::hours(1);
        store
            .values
            .lock()
            .insert("dedup:jane@x.com".into(), recorded_at);
        let cache = cache_with(store);

        // Another instance recorded this key; nothing is in memory here.
        let lookup = cache.exists(&normalize("jane@x.com")).await;
        assert_eq!(
            lookup,
            CacheLookup::Duplicate {
                recorded_at,
                tier: Tier::Durable
            }
        );
    }

    #[tokio::test]
    async fn test_record_writes_both_tiers() {
        let store = Arc::new(FlakyStore::default());
        let cache = cache_with(store.clone());
        let key = normalize("jane@x.com");
        let now = Utc::now();

        cache.record_at(&key, now).await;

        assert_eq!(store.values.lock().get("dedup:jane@x.com"), Some(&now));
        assert_eq!(cache.memory_tier().lookup(&key, now), Some(now));
    }

    #[tokio::test]
    async fn test_durable_read_failure_falls_back_to_memory() {
        let store = Arc::new(FlakyStore {
            fail_get: true,
            ..Default::default()
        });
        let cache = cache_with(store);
        let key = normalize("jane@x.com");

        assert_eq!(cache.exists(&key).await, CacheLookup::Miss);
        cache.record(&key).await;

        let lookup = cache.exists(&key).await;
        assert!(matches!(
            lookup,
            CacheLookup::Duplicate {
                tier: Tier::Memory,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_durable_write_failure_still_records_in_memory() {
        let store = Arc::new(FlakyStore {
            fail_put: true,
            ..Default::default()
        });
        let cache = cache_with(store.clone());
        let key = normalize("jane@x.com");

        cache.record(&key).await;
        assert_eq!(store.puts.load(Ordering::Relaxed), 1);
        assert!(store.values.lock().is_empty());

        // The durable tier misses but the in-process hedge still reports the duplicate.
        assert!(cache.exists(&key).await.is_duplicate());
    }

    #[tokio::test]
    async fn test_durable_timeout_is_unavailable() {
        let store = Arc::new(FlakyStore {
            hang: true,
            ..Default::default()
        });
        let cache = cache_with(store);
        let key = normalize("jane@x.com");

        cache.record(&key).await;
        let lookup = tokio::time::timeout(std::time::Duration::from_secs(5), cache.exists(&key))
            .await
            .expect("durable timeout should bound the lookup");
        assert!(lookup.is_duplicate());
    }

    #[tokio::test]
    async fn test_from_config_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let config = DedupConfig {
            durable_store: Some(DurableStoreConfig::Filesystem {
                path: dir.path().to_str().unwrap().to_string(),
            }),
            durable_timeout_ms: 1000,
        };
        let key = normalize("restart@x.com");

        let cache = DedupCache::from_config(&config).unwrap();
        assert!(cache.has_durable_tier());
        cache.record(&key).await;

        // A fresh instance shares nothing in memory but sees the durable entry.
        let restarted = DedupCache::from_config(&config).unwrap();
        assert!(restarted.memory_tier().is_empty());
        assert!(matches!(
            restarted.exists(&key).await,
            CacheLookup::Duplicate {
                tier: Tier::Durable,
                ..
            }
        ));
    }
}
