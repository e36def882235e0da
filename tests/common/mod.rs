//! Shared test fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use lintel::cache::{MemoryStore, RemoteStore};
use lintel::types::{GatewayError, Result};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// In-memory store that counts calls and can fail multi-gets on demand
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryStore,
    pub gets: AtomicU32,
    pub mgets: AtomicU32,
    pub mset_calls: AtomicU32,
    /// Remaining multi-gets to fail; `u32::MAX` fails forever
    pub fail_mgets: AtomicU32,
}

impl CountingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_mgets(times: u32) -> Arc<Self> {
        let store = Self::default();
        store.fail_mgets.store(times, Ordering::SeqCst);
        Arc::new(store)
    }

    pub fn mget_count(&self) -> u32 {
        self.mgets.load(Ordering::SeqCst)
    }

    pub fn mset_count(&self) -> u32 {
        self.mset_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for CountingStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        self.mgets.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_mgets.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.fail_mgets.store(remaining - 1, Ordering::SeqCst);
            }
            return Err(GatewayError::Cache("connection reset by peer".into()));
        }
        self.inner.mget(keys).await
    }

    async fn set_ex(&self, key: &str, value: String, ttl_secs: u64) -> Result<()> {
        self.inner.set_ex(key, value, ttl_secs).await
    }

    async fn mset_ex(&self, entries: Vec<(String, String, u64)>) -> Result<()> {
        self.mset_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.mset_ex(entries).await
    }

    async fn del(&self, key: &str) -> Result<bool> {
        self.inner.del(key).await
    }

    async fn del_many(&self, keys: &[String]) -> Result<u64> {
        self.inner.del_many(keys).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.inner.keys(pattern).await
    }

    async fn flush_db(&self) -> Result<()> {
        self.inner.flush_db().await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}
