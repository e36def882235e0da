//! Batch orchestration
//!
//! `batch_get` resolves many heterogeneous inputs against the shared tier in
//! fixed-size chunks:
//!
//! 1. keys are computed once per chunk and reused for lookup, miss detection
//!    and write-back
//! 2. one remote multi-get per chunk (skipped when the caller bypasses the cache)
//! 3. misses are populated through the facade's process-wide pool
//! 4. populated values are written through both tiers, empty results with a
//!    shorter TTL
//! 5. hits and populated misses are reassembled in input order
//!
//! A chunk that fails anywhere in 2–4 is retried as a whole; once attempts are
//! exhausted the whole batch fails and no partial results are returned.

use futures::future::try_join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

use super::engine::Cache;
use super::retry::with_retries;
use super::value::{decode, encode, is_empty_result, CacheValue};
use crate::types::{GatewayError, Result};

/// TTL applied to empty populated results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegativeResultTtl {
    /// `min(ttl, configured negative TTL)`
    #[default]
    Configured,
    /// `min(ttl, bound)`
    Bound(Duration),
    /// Empty results are cached like any other
    Disabled,
}

/// Per-call batch options
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// TTL for populated values (configured default when unset)
    pub ttl: Option<Duration>,
    /// Treat every item as a miss; results are still written back
    pub skip_cache: bool,
    pub negative_ttl: NegativeResultTtl,
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn skip_cache(mut self, skip: bool) -> Self {
        self.skip_cache = skip;
        self
    }

    pub fn negative_ttl(mut self, policy: NegativeResultTtl) -> Self {
        self.negative_ttl = policy;
        self
    }
}

impl Cache {
    /// Resolve `items` through the cache, populating misses with `populate`.
    ///
    /// Output order always matches `items`, whichever entries were hits and
    /// in whatever order population calls completed.
    pub async fn batch_get<IN, OUT, K, P, Fut>(
        &self,
        items: &[IN],
        key_fn: K,
        populate: P,
        options: &BatchOptions,
    ) -> Result<Vec<OUT>>
    where
        IN: Clone,
        K: Fn(&IN) -> String,
        P: Fn(IN) -> Fut,
        Fut: Future<Output = Result<OUT>>,
        OUT: Serialize + DeserializeOwned,
    {
        let ttl = options.ttl.unwrap_or(self.config.default_ttl);
        let chunk_size = self.config.read_chunk_size.max(1);
        let populate = &populate;
        let mut results = Vec::with_capacity(items.len());

        for (chunk_index, chunk) in items.chunks(chunk_size).enumerate() {
            let keys: Vec<String> = chunk.iter().map(&key_fn).collect();
            let keys = &keys;

            let processed = with_retries(self.config.batch_attempts, move |attempt| {
                debug!(
                    chunk = chunk_index,
                    attempt = attempt,
                    size = chunk.len(),
                    "Processing batch chunk"
                );
                self.process_chunk(chunk, keys, populate, ttl, options)
            })
            .await?;

            results.extend(processed);
        }

        Ok(results)
    }

    async fn process_chunk<IN, OUT, P, Fut>(
        &self,
        chunk: &[IN],
        keys: &[String],
        populate: &P,
        ttl: Duration,
        options: &BatchOptions,
    ) -> Result<Vec<OUT>>
    where
        IN: Clone,
        P: Fn(IN) -> Fut,
        Fut: Future<Output = Result<OUT>>,
        OUT: Serialize + DeserializeOwned,
    {
        let mut resolved: Vec<Option<OUT>> = if options.skip_cache {
            keys.iter().map(|_| None).collect()
        } else {
            self.remote
                .multi_get(keys)
                .await?
                .into_iter()
                .zip(keys)
                .map(|(value, key)| value.and_then(|value| decode(key, value)))
                .collect()
        };

        let missing: Vec<usize> = resolved
            .iter()
            .enumerate()
            .filter(|(_, value)| value.is_none())
            .map(|(index, _)| index)
            .collect();

        if !missing.is_empty() {
            let populated = try_join_all(missing.iter().map(|&index| {
                let input = chunk[index].clone();
                async move {
                    let _permit = self.pool.acquire().await.map_err(|e| {
                        GatewayError::Internal(format!("population pool closed: {}", e))
                    })?;
                    populate(input).await
                }
            }))
            .await?;

            let mut write_keys = Vec::with_capacity(missing.len());
            let mut write_values = Vec::with_capacity(missing.len());
            let mut write_ttls = Vec::with_capacity(missing.len());
            for (&index, value) in missing.iter().zip(&populated) {
                let encoded = encode(value)?;
                write_ttls.push(self.result_ttl(ttl, is_empty_result(&encoded), options));
                write_keys.push(keys[index].clone());
                write_values.push(encoded);
            }
            self.batch_set_cache(&write_keys, &write_values, &write_ttls).await?;

            for (index, value) in missing.iter().zip(populated) {
                resolved[*index] = Some(value);
            }
        }

        debug!(
            size = keys.len(),
            hits = keys.len() - missing.len(),
            misses = missing.len(),
            "Batch chunk resolved"
        );

        resolved
            .into_iter()
            .collect::<Option<Vec<OUT>>>()
            .ok_or_else(|| GatewayError::Internal("batch chunk left unresolved items".into()))
    }

    fn result_ttl(&self, ttl: Duration, empty: bool, options: &BatchOptions) -> Duration {
        match options.negative_ttl {
            NegativeResultTtl::Configured => self.config.ttl_for_result(ttl, empty),
            NegativeResultTtl::Bound(bound) if empty => ttl.min(bound),
            NegativeResultTtl::Bound(_) | NegativeResultTtl::Disabled => ttl,
        }
    }

    /// Write values through both tiers with jittered TTLs.
    ///
    /// Local and remote writes are independent; the remote tier receives one
    /// multi-set per write chunk.
    pub async fn batch_set_cache(
        &self,
        keys: &[String],
        values: &[CacheValue],
        ttls: &[Duration],
    ) -> Result<()> {
        if keys.len() != values.len() || keys.len() != ttls.len() {
            return Err(GatewayError::Internal(format!(
                "batch_set_cache length mismatch: {} keys, {} values, {} ttls",
                keys.len(),
                values.len(),
                ttls.len()
            )));
        }

        let ttls: Vec<Duration> = ttls.iter().map(|ttl| self.jitter.spread(*ttl)).collect();

        for ((key, value), ttl) in keys.iter().zip(values).zip(&ttls) {
            self.local.set(key, value.clone(), *ttl);
        }

        let chunk_size = self.config.write_chunk_size.max(1);
        for ((keys, values), ttls) in keys
            .chunks(chunk_size)
            .zip(values.chunks(chunk_size))
            .zip(ttls.chunks(chunk_size))
        {
            self.remote.multi_set(keys, values, ttls).await?;
        }

        Ok(())
    }

    /// Look up many keys, local tier first.
    ///
    /// Local misses are fetched with one remote multi-get and backfilled
    /// locally with the configured share of the default TTL.
    pub async fn batch_get_cache<T: DeserializeOwned>(
        &self,
        keys: &[String],
    ) -> Result<Vec<Option<T>>> {
        let mut values: Vec<Option<CacheValue>> =
            keys.iter().map(|key| self.local.get(key)).collect();

        let missing: Vec<usize> = values
            .iter()
            .enumerate()
            .filter(|(_, value)| value.is_none())
            .map(|(index, _)| index)
            .collect();

        if !missing.is_empty() {
            let missing_keys: Vec<String> =
                missing.iter().map(|&index| keys[index].clone()).collect();
            let remote_values = self.remote.multi_get(&missing_keys).await?;
            let local_ttl = self.config.local_ttl_for(self.config.default_ttl);

            for (index, value) in missing.into_iter().zip(remote_values) {
                if let Some(ref value) = value {
                    self.local.set(&keys[index], value.clone(), local_ttl);
                }
                values[index] = value;
            }
        }

        Ok(keys
            .iter()
            .zip(values)
            .map(|(key, value)| value.and_then(|value| decode(key, value)))
            .collect())
    }

    /// Remove a batch of keys from both tiers, logging the count
    pub async fn batch_delete(&self, keys: &[String]) -> Result<u64> {
        let removed = self.delete_many(keys).await?;
        info!(requested = keys.len(), removed = removed, "Batch delete");
        Ok(removed)
    }
}
