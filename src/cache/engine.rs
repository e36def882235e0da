//! Cache facade
//!
//! Owns both tiers, the pending-operation table and the population pool for
//! its lifetime. Single-key reads go local → remote → population; batch reads
//! live in [`super::batch`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::jitter::TtlJitter;
use super::local::{LocalCache, LocalStats};
use super::remote::{MemoryStore, RemoteCache, RemoteStore};
use super::single_flight::SingleFlight;
use super::value::{decode, encode, CacheValue};
use super::CacheConfig;
use crate::types::{GatewayError, Result};

/// Facade statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub local: LocalStats,
    /// Operations currently deduplicated in the pending table
    pub in_flight: usize,
    /// Free population permits
    pub pool_available: usize,
}

/// Multi-tier cache facade
pub struct Cache {
    pub(super) local: Arc<LocalCache>,
    pub(super) remote: RemoteCache,
    /// Pending operation table, `caching:get:*` and `caching:set:*` namespaces
    pub(super) flights: SingleFlight<Option<CacheValue>>,
    pub(super) jitter: TtlJitter,
    /// Process-wide cap on concurrent population calls
    pub(super) pool: Arc<Semaphore>,
    pub(super) config: CacheConfig,
}

fn get_op_key(key: &str) -> String {
    format!("caching:get:{}", key)
}

fn set_op_key(key: &str) -> String {
    format!("caching:set:{}", key)
}

impl Cache {
    /// Create a cache over a shared store
    pub fn new(store: Arc<dyn RemoteStore>, config: CacheConfig) -> Self {
        info!(
            default_ttl_secs = config.default_ttl.as_secs(),
            pool_limit = config.pool_limit,
            read_chunk_size = config.read_chunk_size,
            "Cache initialized"
        );

        Self {
            local: Arc::new(LocalCache::new()),
            remote: RemoteCache::new(store),
            flights: SingleFlight::new(),
            jitter: TtlJitter::new(config.jitter_threshold, config.jitter_percent),
            pool: Arc::new(Semaphore::new(config.pool_limit.max(1))),
            config,
        }
    }

    /// Create a cache whose shared tier lives in this process
    pub fn in_memory(config: CacheConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new()), config)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Local tier handle (for cleanup tasks and peer invalidation)
    pub fn local(&self) -> &Arc<LocalCache> {
        &self.local
    }

    pub fn remote(&self) -> &RemoteCache {
        &self.remote
    }

    pub fn jitter(&self) -> &TtlJitter {
        &self.jitter
    }

    // =========================================================================
    // Local tier
    // =========================================================================

    pub fn get_local<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.local.get(key).and_then(|value| decode(key, value))
    }

    pub fn set_local<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        self.local.set(key, encode(value)?, ttl);
        Ok(())
    }

    pub fn delete_local(&self, key: &str) -> bool {
        self.local.delete(key)
    }

    // =========================================================================
    // Remote tier
    // =========================================================================

    /// Remote read, deduplicated under `caching:get:<key>`
    async fn fetch_remote(&self, key: &str) -> Result<Option<CacheValue>> {
        let remote = self.remote.clone();
        let owned_key = key.to_string();
        self.flights
            .run_exclusive(&get_op_key(key), move || async move { remote.get(&owned_key).await })
            .await
    }

    pub async fn get_remote<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        Ok(self
            .fetch_remote(key)
            .await?
            .and_then(|value| decode(key, value)))
    }

    pub async fn set_remote<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        self.remote.set(key, &encode(value)?, ttl).await
    }

    // =========================================================================
    // Both tiers
    // =========================================================================

    /// Local first, then remote. No backfill; see [`Cache::get_or_populate`].
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        if let Some(value) = self.get_local(key) {
            return Ok(Some(value));
        }
        self.get_remote(key).await
    }

    /// Write through both tiers with the same TTL
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let value = encode(value)?;
        self.local.set(key, value.clone(), ttl);
        self.remote.set(key, &value, ttl).await
    }

    /// Reload the local entry from the remote tier
    pub async fn refresh_local(&self, key: &str, ttl: Duration) -> Result<Option<CacheValue>> {
        match self.remote.get(key).await? {
            Some(value) => Ok(Some(self.local.set(key, value, ttl))),
            None => {
                self.local.delete(key);
                Ok(None)
            }
        }
    }

    /// Read through both tiers, populating once on a miss.
    ///
    /// - Local hit: returned as is.
    /// - Remote hit: local is backfilled with exactly `local_ttl` (the remote
    ///   entry's remaining lifetime is unknown, so no jitter either).
    /// - Miss: `populate` runs once across all concurrent callers for `key`.
    ///   The result is written locally when `local_ttl > 0` and remotely when
    ///   `remote_ttl > 0`.
    ///
    /// `local_ttl` defaults to `remote_ttl` scaled by the configured ratio (half).
    pub async fn get_or_populate<T, F, Fut>(
        &self,
        key: &str,
        populate: F,
        remote_ttl: Duration,
        local_ttl: Option<Duration>,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let local_ttl = local_ttl.unwrap_or_else(|| self.config.local_ttl_for(remote_ttl));

        if let Some(value) = self.get_local::<T>(key) {
            return Ok(value);
        }

        if let Some(value) = self.fetch_remote(key).await? {
            if let Some(typed) = decode::<T>(key, value.clone()) {
                if !local_ttl.is_zero() {
                    self.local.set(key, value, local_ttl);
                }
                debug!(
                    key = key,
                    local_ttl_ms = local_ttl.as_millis() as u64,
                    "Backfilled local from remote"
                );
                return Ok(typed);
            }
        }

        let local = Arc::clone(&self.local);
        let remote = self.remote.clone();
        let owned_key = key.to_string();

        let populated = self
            .flights
            .run_exclusive(&set_op_key(key), move || {
                let fut = populate();
                async move {
                    let value = encode(&fut.await?)?;
                    if !local_ttl.is_zero() {
                        local.set(&owned_key, value.clone(), local_ttl);
                    }
                    if !remote_ttl.is_zero() {
                        remote.set(&owned_key, &value, remote_ttl).await?;
                    }
                    debug!(key = %owned_key, "Populated cache entry");
                    Ok(Some(value))
                }
            })
            .await?;

        let value = populated.ok_or_else(|| {
            GatewayError::Internal(format!("population for {} produced no value", key))
        })?;
        serde_json::from_value(value).map_err(GatewayError::from)
    }

    /// Delete a key from both tiers; true if either tier held it
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let local = self.local.delete(key);
        let remote = self.remote.delete(key).await?;
        Ok(local || remote)
    }

    /// Delete many keys from both tiers; number of keys the remote tier held
    pub async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        for key in keys {
            self.local.delete(key);
        }
        self.remote.delete_many(keys).await
    }

    /// Delete every key matching `pattern`, enumerated in the remote tier
    pub async fn delete_by_pattern(&self, pattern: &str) -> Result<Vec<String>> {
        let keys = self.remote.list_keys(pattern).await?;
        if keys.is_empty() {
            return Ok(keys);
        }
        self.delete_many(&keys).await?;
        debug!(pattern = pattern, count = keys.len(), "Deleted keys by pattern");
        Ok(keys)
    }

    /// Keys in the remote tier matching `pattern`
    pub async fn list_keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.remote.list_keys(pattern).await
    }

    /// Drop everything in both tiers
    pub async fn flush_all(&self) -> Result<()> {
        self.local.clear();
        self.remote.flush_all().await
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            local: self.local.stats(),
            in_flight: self.flights.in_flight(),
            pool_available: self.pool.available_permits(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache() -> Cache {
        Cache::in_memory(CacheConfig::default())
    }

    #[tokio::test]
    async fn test_set_then_get_both_tiers() {
        let cache = cache();
        cache.set("economics", &json!({"supply": "100"}), Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.get_local::<CacheValue>("economics"), Some(json!({"supply": "100"})));
        assert_eq!(
            cache.get_remote::<CacheValue>("economics").await.unwrap(),
            Some(json!({"supply": "100"}))
        );
    }

    #[tokio::test]
    async fn test_get_falls_back_to_remote() {
        let cache = cache();
        cache.set_remote("stats", &json!(12), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get::<u64>("stats").await.unwrap(), Some(12));
        // Plain get does not backfill
        assert!(cache.get_local::<u64>("stats").is_none());
    }

    #[tokio::test]
    async fn test_local_hit_skips_population() {
        let cache = cache();
        cache.set_local("k", &json!("local"), Duration::from_secs(60)).unwrap();

        let value: String = cache
            .get_or_populate(
                "k",
                || async { Err(GatewayError::population("should not run")) },
                Duration::from_secs(60),
                None,
            )
            .await
            .unwrap();
        assert_eq!(value, "local");
    }

    #[tokio::test]
    async fn test_population_writes_both_tiers() {
        let cache = cache();
        let value: u64 = cache
            .get_or_populate(
                "blocks:count",
                || async { Ok(981u64) },
                Duration::from_secs(600),
                None,
            )
            .await
            .unwrap();
        assert_eq!(value, 981);

        let entry = cache.local().entry("blocks:count").unwrap();
        assert_eq!(entry.ttl, Duration::from_secs(300));
        assert_eq!(cache.remote().get("blocks:count").await.unwrap(), Some(json!(981)));
    }

    #[tokio::test]
    async fn test_zero_ttls_skip_tiers() {
        let cache = cache();

        let _: u64 = cache
            .get_or_populate(
                "remote-only",
                || async { Ok(1u64) },
                Duration::from_secs(60),
                Some(Duration::ZERO),
            )
            .await
            .unwrap();
        assert!(cache.local().entry("remote-only").is_none());
        assert!(cache.remote().get("remote-only").await.unwrap().is_some());

        let _: u64 = cache
            .get_or_populate(
                "local-only",
                || async { Ok(2u64) },
                Duration::ZERO,
                Some(Duration::from_secs(30)),
            )
            .await
            .unwrap();
        assert!(cache.local().entry("local-only").is_some());
        assert!(cache.remote().get("local-only").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_population_failure_propagates_and_clears() {
        let cache = cache();
        let result: Result<u64> = cache
            .get_or_populate(
                "k",
                || async { Err(GatewayError::population("gateway timeout")) },
                Duration::from_secs(60),
                None,
            )
            .await;
        assert_eq!(result, Err(GatewayError::Population("gateway timeout".into())));
        assert_eq!(cache.stats().in_flight, 0);

        let retried: u64 = cache
            .get_or_populate("k", || async { Ok(3u64) }, Duration::from_secs(60), None)
            .await
            .unwrap();
        assert_eq!(retried, 3);
    }

    #[tokio::test]
    async fn test_refresh_local() {
        let cache = cache();
        cache.set_remote("k", &json!("fresh"), Duration::from_secs(60)).await.unwrap();
        cache.set_local("k", &json!("stale"), Duration::from_secs(60)).unwrap();

        let refreshed = cache.refresh_local("k", Duration::from_secs(30)).await.unwrap();
        assert_eq!(refreshed, Some(json!("fresh")));
        assert_eq!(cache.get_local::<String>("k").as_deref(), Some("fresh"));

        cache.remote().delete("k").await.unwrap();
        assert_eq!(cache.refresh_local("k", Duration::from_secs(30)).await.unwrap(), None);
        assert!(cache.get_local::<String>("k").is_none());
    }

    #[tokio::test]
    async fn test_delete_by_pattern_clears_both_tiers() {
        let cache = cache();
        let ttl = Duration::from_secs(60);
        cache.set("accountTokens:addr1alice:0", &json!([1]), ttl).await.unwrap();
        cache.set("accountTokens:addr1alice:1", &json!([2]), ttl).await.unwrap();
        cache.set("accountTokens:addr1bob:0", &json!([3]), ttl).await.unwrap();

        let removed = cache.delete_by_pattern("accountTokens:addr1alice*").await.unwrap();
        assert_eq!(removed.len(), 2);
        assert!(cache.get_local::<CacheValue>("accountTokens:addr1alice:0").is_none());
        assert!(cache.get_local::<CacheValue>("accountTokens:addr1bob:0").is_some());
        assert_eq!(
            cache.list_keys("accountTokens:*").await.unwrap(),
            vec!["accountTokens:addr1bob:0"]
        );
    }

    #[tokio::test]
    async fn test_flush_all() {
        let cache = cache();
        cache.set("k", &json!(1), Duration::from_secs(60)).await.unwrap();
        cache.flush_all().await.unwrap();
        assert_eq!(cache.get::<u64>("k").await.unwrap(), None);
    }

    #[test]
    fn test_stats_report_pool() {
        let cache = cache();
        let stats = cache.stats();
        assert_eq!(stats.pool_available, 10);
        assert_eq!(stats.in_flight, 0);
    }
}
