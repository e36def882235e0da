//! Invalidation manager
//!
//! Turns processed transactions into deletions across both cache tiers.
//! Affected keys are announced on a broadcast channel so peers can drop them
//! from their own local tiers (see [`crate::events`]). Exact-key targets are
//! announced whether or not this process held them, since a peer may hold a
//! local-only copy.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::rules::{InvalidationTarget, RuleSet};
use super::transaction::Transaction;
use crate::cache::Cache;
use crate::types::{GatewayError, Result};

/// Capacity of the removed-keys broadcast channel
const INVALIDATION_CHANNEL_CAPACITY: usize = 1024;

/// Keys affected by one invalidation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidatedKeys {
    pub keys: Vec<String>,
}

/// Applies invalidation rules to a [`Cache`]
pub struct InvalidationManager {
    cache: Arc<Cache>,
    rules: RuleSet,
    removed_tx: broadcast::Sender<InvalidatedKeys>,
}

impl InvalidationManager {
    pub fn new(cache: Arc<Cache>, rules: RuleSet) -> Self {
        let (removed_tx, _) = broadcast::channel(INVALIDATION_CHANNEL_CAPACITY);
        Self {
            cache,
            rules,
            removed_tx,
        }
    }

    /// Manager with the built-in rule set
    pub fn with_default_rules(cache: Arc<Cache>) -> Self {
        Self::new(cache, RuleSet::defaults())
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Subscribe to keys invalidated by this manager
    pub fn subscribe(&self) -> broadcast::Receiver<InvalidatedKeys> {
        self.removed_tx.subscribe()
    }

    /// Delete one key from both tiers.
    ///
    /// Returns the key when a tier held it, nothing otherwise. A missing key
    /// is not an error.
    pub async fn invalidate_key(&self, key: &str) -> Result<Vec<String>> {
        let removed = if self.cache.delete(key).await? {
            vec![key.to_string()]
        } else {
            Vec::new()
        };
        debug!(key = key, removed = removed.len(), "Invalidated key");
        Ok(removed)
    }

    /// Delete every key matching `pattern`, enumerated in the remote tier
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<Vec<String>> {
        let removed = self.cache.delete_by_pattern(pattern).await?;
        debug!(pattern = pattern, removed = removed.len(), "Invalidated pattern");
        Ok(removed)
    }

    pub async fn invalidate(&self, target: &InvalidationTarget) -> Result<Vec<String>> {
        match target {
            InvalidationTarget::Key(key) => self.invalidate_key(key).await,
            InvalidationTarget::Pattern(pattern) => self.invalidate_pattern(pattern).await,
        }
    }

    /// Remove every key `tx` affects.
    ///
    /// Each target is attempted once; a failing target is logged and the rest
    /// still run. The first failure is returned after all targets were tried.
    /// Unmatched transactions are a no-op.
    pub async fn invalidate_transaction(&self, tx: &Transaction) -> Result<Vec<String>> {
        let targets = self.rules.targets_for(tx);
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let mut removed = Vec::new();
        let mut announced: Vec<String> = Vec::new();
        let mut first_error: Option<GatewayError> = None;

        for target in &targets {
            if let InvalidationTarget::Key(key) = target {
                announced.push(key.clone());
            }
            match self.invalidate(target).await {
                Ok(keys) => {
                    if matches!(target, InvalidationTarget::Pattern(_)) {
                        for key in &keys {
                            if !announced.contains(key) {
                                announced.push(key.clone());
                            }
                        }
                    }
                    removed.extend(keys);
                }
                Err(e) => {
                    warn!(target = target.as_str(), error = %e, "Invalidation target failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        if !removed.is_empty() {
            info!(
                function = tx.function_name().unwrap_or_default(),
                sender = %tx.sender,
                removed = removed.len(),
                "Transaction invalidated cache keys"
            );
        }
        if !announced.is_empty() {
            self.announce(&announced);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }

    /// Drop keys from this process's local tier only; for peer announcements
    pub fn invalidate_local(&self, keys: &[String]) -> usize {
        keys.iter().filter(|key| self.cache.delete_local(key)).count()
    }

    fn announce(&self, keys: &[String]) {
        // No receivers is fine: running without peers
        let _ = self.removed_tx.send(InvalidatedKeys { keys: keys.to_vec() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, MemoryStore, RemoteStore};
    use crate::invalidation::{FunctionCall, InvalidationRule};
    use serde_json::json;
    use std::time::Duration;

    const TTL: Duration = Duration::from_secs(60);

    fn manager(rules: RuleSet) -> InvalidationManager {
        InvalidationManager::new(Arc::new(Cache::in_memory(CacheConfig::default())), rules)
    }

    fn transfer(token: &str) -> Transaction {
        Transaction::new(
            "addr1alice",
            "addr1bob",
            Some(FunctionCall::new("transfer", vec![hex::encode(token)])),
        )
    }

    #[tokio::test]
    async fn test_exact_delete_is_idempotent() {
        let manager = manager(RuleSet::default());
        manager.cache.set("token:TKN", &json!({"decimals": 18}), TTL).await.unwrap();

        assert_eq!(manager.invalidate_key("token:TKN").await.unwrap(), vec!["token:TKN"]);
        assert!(manager.invalidate_key("token:TKN").await.unwrap().is_empty());
        assert!(manager.cache.get::<serde_json::Value>("token:TKN").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pattern_delete_hits_both_tiers() {
        let manager = manager(RuleSet::default());
        manager.cache.set("tokens:addr1alice:0", &json!(["A"]), TTL).await.unwrap();
        manager.cache.set("tokens:addr1alice:1", &json!(["B"]), TTL).await.unwrap();
        manager.cache.set("tokens:addr1bob:0", &json!(["C"]), TTL).await.unwrap();

        let mut removed = manager.invalidate_pattern("tokens:addr1alice:*").await.unwrap();
        removed.sort();
        assert_eq!(removed, vec!["tokens:addr1alice:0", "tokens:addr1alice:1"]);
        assert!(manager.cache.get_local::<serde_json::Value>("tokens:addr1alice:0").is_none());
        assert!(manager.cache.get_local::<serde_json::Value>("tokens:addr1bob:0").is_some());
    }

    #[tokio::test]
    async fn test_transaction_invalidation() {
        let manager = manager(RuleSet::defaults());
        manager.cache.set("balance:addr1alice:TKN", &json!("10"), TTL).await.unwrap();
        manager.cache.set("balance:addr1bob:TKN", &json!("5"), TTL).await.unwrap();
        manager.cache.set("balance:addr1carol:TKN", &json!("1"), TTL).await.unwrap();

        let removed = manager.invalidate_transaction(&transfer("TKN")).await.unwrap();
        assert_eq!(removed, vec!["balance:addr1alice:TKN", "balance:addr1bob:TKN"]);
        assert!(manager.cache.get_local::<String>("balance:addr1carol:TKN").is_some());

        // Second pass finds nothing left and still succeeds
        assert!(manager.invalidate_transaction(&transfer("TKN")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unmatched_transaction_is_noop() {
        let manager = manager(RuleSet::defaults());
        manager.cache.set("balance:addr1alice:TKN", &json!("10"), TTL).await.unwrap();

        let tx = Transaction::new("addr1alice", "addr1bob", None);
        assert!(manager.invalidate_transaction(&tx).await.unwrap().is_empty());
        assert!(manager.cache.get_local::<String>("balance:addr1alice:TKN").is_some());
    }

    #[tokio::test]
    async fn test_removed_keys_are_announced() {
        let manager = manager(RuleSet::new(vec![InvalidationRule::new(
            "transfer",
            &["balance:{sender}:{arg0}"],
        )]));
        let mut announcements = manager.subscribe();
        manager.cache.set("balance:addr1alice:TKN", &json!("10"), TTL).await.unwrap();

        manager.invalidate_transaction(&transfer("TKN")).await.unwrap();
        assert_eq!(
            announcements.recv().await.unwrap(),
            InvalidatedKeys {
                keys: vec!["balance:addr1alice:TKN".into()]
            }
        );
    }

    #[tokio::test]
    async fn test_keys_not_held_here_are_still_announced() {
        let manager = manager(RuleSet::defaults());
        let mut announcements = manager.subscribe();

        let removed = manager.invalidate_transaction(&transfer("TKN")).await.unwrap();
        assert!(removed.is_empty());
        assert_eq!(
            announcements.recv().await.unwrap().keys,
            vec!["balance:addr1alice:TKN", "balance:addr1bob:TKN"]
        );
    }

    #[tokio::test]
    async fn test_invalidate_local_leaves_remote() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(Cache::new(store.clone(), CacheConfig::default()));
        let manager = InvalidationManager::new(Arc::clone(&cache), RuleSet::default());
        cache.set("token:TKN", &json!(1), TTL).await.unwrap();

        assert_eq!(manager.invalidate_local(&["token:TKN".into(), "token:other".into()]), 1);
        assert!(cache.get_local::<u64>("token:TKN").is_none());
        assert!(store.get("token:TKN").await.unwrap().is_some());
    }
}
