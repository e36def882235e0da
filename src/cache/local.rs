//! Local cache tier
//!
//! In-process key → value map with per-key TTL. Expiry is the only
//! reclamation mechanism: expired entries are dropped on read and by the
//! periodic sweep in [`spawn_cleanup_task`].

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::value::CacheValue;

/// A cached entry with expiry
#[derive(Debug, Clone)]
pub struct LocalEntry {
    /// The cached value
    pub value: CacheValue,
    /// TTL the entry was written with
    pub ttl: Duration,
    /// When this entry expires
    pub expires_at: Instant,
}

impl LocalEntry {
    /// Create a new entry expiring `ttl` from now
    pub fn new(value: CacheValue, ttl: Duration) -> Self {
        Self {
            value,
            ttl,
            expires_at: Instant::now() + ttl,
        }
    }

    /// Check if this entry has expired
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Remaining lifetime
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// Local tier statistics
#[derive(Debug, Clone, Default)]
pub struct LocalStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl LocalStats {
    /// Calculate hit rate as percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Process-local cache tier
#[derive(Default)]
pub struct LocalCache {
    /// key -> entry
    entries: DashMap<String, LocalEntry>,
    /// Hit counter
    hits: AtomicU64,
    /// Miss counter
    misses: AtomicU64,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a live value
    pub fn get(&self, key: &str) -> Option<CacheValue> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = key, "Local cache hit");
                return Some(entry.value.clone());
            }
            // Entry expired, remove it
            drop(entry); // Release the reference before removing
            self.entries.remove_if(key, |_, entry| entry.is_expired());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Get a live entry including its TTL metadata
    pub fn entry(&self, key: &str) -> Option<LocalEntry> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.clone())
    }

    /// Store a value for `ttl`, returning it
    pub fn set(&self, key: &str, value: CacheValue, ttl: Duration) -> CacheValue {
        debug!(key = key, ttl_ms = ttl.as_millis() as u64, "Local cache set");
        self.entries
            .insert(key.to_string(), LocalEntry::new(value.clone(), ttl));
        value
    }

    /// Remove an entry, returning whether a live one was present
    pub fn delete(&self, key: &str) -> bool {
        self.entries
            .remove(key)
            .map(|(_, entry)| !entry.is_expired())
            .unwrap_or(false)
    }

    /// Clear all entries
    pub fn clear(&self) {
        self.entries.clear();
        info!("Local cache cleared");
    }

    /// Remove expired entries
    pub fn cleanup(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let count = before.saturating_sub(self.entries.len());

        if count > 0 {
            debug!(count = count, "Cleaned up expired local cache entries");
        }
        count
    }

    /// Number of stored entries (expired ones included until swept)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> LocalStats {
        LocalStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Spawn a background task to periodically cleanup expired entries
pub fn spawn_cleanup_task(
    cache: Arc<LocalCache>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    let handle = tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let removed = cache.cleanup();
            let stats = cache.stats();
            debug!(
                removed = removed,
                entries = stats.entries,
                hit_rate = format!("{:.1}%", stats.hit_rate()),
                "Local cache cleanup completed"
            );
        }
    });

    info!(interval_secs = interval.as_secs(), "Local cache cleanup task started");
    handle
}
