//! Remote (shared) cache tier
//!
//! [`RemoteStore`] is the raw key → JSON text contract over a shared
//! Redis-protocol store. [`RemoteCache`] sits on top of it and owns the
//! serialization boundary: values go out as JSON text, and text that fails to
//! parse on the way back is reported as absent rather than as an error.
//! Connection and command failures always propagate.
//!
//! Implementations:
//! - [`RedisStore`]: pooled Redis connections (GET, MGET, SET EX, MULTI, DEL, KEYS, FLUSHDB)
//! - [`MemoryStore`]: in-process stand-in with the same TTL and glob semantics,
//!   used in development mode and tests

use async_trait::async_trait;
use dashmap::DashMap;
use deadpool_redis::{Pool, PoolConfig, Runtime};
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::keys::matches_pattern;
use super::value::CacheValue;
use crate::types::{GatewayError, Result};

/// Raw shared key-value store
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// GET
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// MGET; result has the same length and order as `keys`
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    /// SET with expiry in seconds
    async fn set_ex(&self, key: &str, value: String, ttl_secs: u64) -> Result<()>;

    /// Atomic batch of SET with expiry (key, value, ttl_secs)
    async fn mset_ex(&self, entries: Vec<(String, String, u64)>) -> Result<()>;

    /// DEL; true if the key existed
    async fn del(&self, key: &str) -> Result<bool>;

    /// Atomic multi-key DEL; number of keys that existed
    async fn del_many(&self, keys: &[String]) -> Result<u64>;

    /// KEYS
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// FLUSHDB
    async fn flush_db(&self) -> Result<()>;

    /// Liveness probe
    async fn ping(&self) -> Result<()>;
}

/// Seconds for the store's expiry, rounding sub-second remainders up
fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

// ============================================================================
// Redis
// ============================================================================

/// Redis-backed shared store
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Wrap an existing pool
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build a pool and verify a connection can be obtained
    pub async fn connect(url: &str, pool_size: usize, timeout: Duration) -> Result<Self> {
        info!(url = %url, pool_size = pool_size, "Connecting to Redis");

        let mut redis_config = deadpool_redis::Config::from_url(url);
        let mut pool_config = PoolConfig::new(pool_size);
        pool_config.timeouts.wait = Some(timeout);
        pool_config.timeouts.create = Some(timeout);
        pool_config.timeouts.recycle = Some(timeout);
        redis_config.pool = Some(pool_config);

        let pool = redis_config.create_pool(Some(Runtime::Tokio1))?;
        let store = Self::new(pool);
        store.ping().await?;

        info!(url = %url, "Connected to Redis");
        Ok(store)
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.get::<_, Option<String>>(key).await?)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let values: Vec<Option<String>> =
            redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
        Ok(values)
    }

    async fn set_ex(&self, key: &str, value: String, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn mset_ex(&self, entries: Vec<(String, String, u64)>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value, ttl) in entries {
            pipe.set_ex(key, value, ttl).ignore();
        }

        let mut conn = self.conn().await?;
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn del_many(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let removed: u64 = conn.del(keys).await?;
        Ok(removed)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.keys::<_, Vec<String>>(pattern).await?)
    }

    async fn flush_db(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-process shared-store stand-in
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining lifetime in whole seconds, rounded up (like Redis `TTL`)
    pub fn ttl(&self, key: &str) -> Option<u64> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| ttl_secs(entry.expires_at.saturating_duration_since(Instant::now())))
    }

    /// Store raw text, bypassing serialization (tests use this to plant corrupt payloads)
    pub fn insert_raw(&self, key: &str, value: &str, ttl_secs: u64) {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );
    }

    fn live(&self, key: &str) -> Option<String> {
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => Some(entry.value.clone()),
            Some(entry) => {
                drop(entry);
                self.entries.remove_if(key, |_, entry| entry.is_expired());
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.live(key))
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        Ok(keys.iter().map(|key| self.live(key)).collect())
    }

    async fn set_ex(&self, key: &str, value: String, ttl_secs: u64) -> Result<()> {
        self.insert_raw(key, &value, ttl_secs);
        Ok(())
    }

    async fn mset_ex(&self, entries: Vec<(String, String, u64)>) -> Result<()> {
        for (key, value, ttl) in entries {
            self.insert_raw(&key, &value, ttl);
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool> {
        Ok(self
            .entries
            .remove(key)
            .map(|(_, entry)| !entry.is_expired())
            .unwrap_or(false))
    }

    async fn del_many(&self, keys: &[String]) -> Result<u64> {
        let mut removed = 0;
        for key in keys {
            if self.del(key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| !entry.is_expired() && matches_pattern(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn flush_db(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Client
// ============================================================================

/// Serializing client over a [`RemoteStore`]
#[derive(Clone)]
pub struct RemoteCache {
    store: Arc<dyn RemoteStore>,
}

impl RemoteCache {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    fn decode(key: &str, raw: Option<String>) -> Option<CacheValue> {
        let raw = raw?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = key, error = %e, "Corrupt remote cache payload, treating as miss");
                None
            }
        }
    }

    /// Get a value; corrupt payloads are reported as absent
    pub async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        let raw = self.store.get(key).await?;
        let value = Self::decode(key, raw);
        debug!(key = key, hit = value.is_some(), "Remote cache get");
        Ok(value)
    }

    /// Get many values in one round trip, ordered like `keys`
    pub async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<CacheValue>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let raw = self.store.mget(keys).await?;
        if raw.len() != keys.len() {
            return Err(GatewayError::Cache(format!(
                "MGET returned {} values for {} keys",
                raw.len(),
                keys.len()
            )));
        }

        Ok(keys
            .iter()
            .zip(raw)
            .map(|(key, raw)| Self::decode(key, raw))
            .collect())
    }

    /// Set a value with expiry
    pub async fn set(&self, key: &str, value: &CacheValue, ttl: Duration) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        self.store.set_ex(key, payload, ttl_secs(ttl)).await?;
        debug!(key = key, ttl_secs = ttl_secs(ttl), "Remote cache set");
        Ok(())
    }

    /// Set many values in one atomic submission
    pub async fn multi_set(
        &self,
        keys: &[String],
        values: &[CacheValue],
        ttls: &[Duration],
    ) -> Result<()> {
        if keys.len() != values.len() || keys.len() != ttls.len() {
            return Err(GatewayError::Internal(format!(
                "multi_set length mismatch: {} keys, {} values, {} ttls",
                keys.len(),
                values.len(),
                ttls.len()
            )));
        }
        if keys.is_empty() {
            return Ok(());
        }

        let mut entries = Vec::with_capacity(keys.len());
        for ((key, value), ttl) in keys.iter().zip(values).zip(ttls) {
            entries.push((key.clone(), serde_json::to_string(value)?, ttl_secs(*ttl)));
        }

        self.store.mset_ex(entries).await?;
        debug!(count = keys.len(), "Remote cache multi-set");
        Ok(())
    }

    /// Delete a key; true if it existed
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.store.del(key).await
    }

    /// Delete many keys atomically
    pub async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        self.store.del_many(keys).await
    }

    /// Keys matching a glob pattern. Cost is proportional to the keyspace, keep off hot paths.
    pub async fn list_keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.store.keys(pattern).await
    }

    /// Delete every key matching a pattern, returning the matched keys
    pub async fn delete_by_pattern(&self, pattern: &str) -> Result<Vec<String>> {
        let keys = self.list_keys(pattern).await?;
        if !keys.is_empty() {
            self.delete_many(&keys).await?;
            debug!(pattern = pattern, count = keys.len(), "Remote cache pattern delete");
        }
        Ok(keys)
    }

    /// Drop the whole shared keyspace
    pub async fn flush_all(&self) -> Result<()> {
        self.store.flush_db().await?;
        info!("Remote cache flushed");
        Ok(())
    }

    /// Check if the shared store answers (for health checks)
    pub async fn is_available(&self) -> bool {
        self.store.ping().await.is_ok()
    }
}
