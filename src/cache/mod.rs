//! Caching layer for Lintel
//!
//! Two tiers sit in front of upstream ledger services:
//!
//! - **Local** ([`local`]): process-local `DashMap` with per-key TTL
//! - **Remote** ([`remote`]): shared Redis-protocol store, visible to every instance
//!
//! The [`Cache`] facade reads local → remote → population, deduplicating
//! concurrent population per key ([`single_flight`]) and spreading TTLs
//! ([`jitter`]) so mass-populated keys do not expire together.
//!
//! ## Batch population
//!
//! [`Cache::batch_get`] partitions inputs into chunks, issues one remote
//! multi-get per chunk, populates misses through a process-wide bounded pool
//! and writes results back to both tiers. A failing chunk is retried as a whole
//! ([`retry`]).
//!
//! ```text
//! caller ──► Cache ──► LocalCache ──miss──► RemoteCache ──miss──► SingleFlight ──► populate()
//!              ▲                                                                      │
//!              └──────────────── write-through (local + remote, jittered TTL) ◄───────┘
//! ```

pub mod batch;
pub mod engine;
pub mod jitter;
pub mod keys;
pub mod local;
pub mod remote;
pub mod retry;
pub mod single_flight;
pub mod value;

pub use batch::{BatchOptions, NegativeResultTtl};
pub use engine::{Cache, CacheStats};
pub use jitter::TtlJitter;
pub use keys::{escape_glob, is_pattern, matches_pattern, CacheKey};
pub use local::{spawn_cleanup_task, LocalCache, LocalEntry, LocalStats};
pub use remote::{MemoryStore, RedisStore, RemoteCache, RemoteStore};
pub use retry::with_retries;
pub use single_flight::SingleFlight;
pub use value::{is_empty_result, CacheValue};

use std::time::Duration;

/// Cache configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// TTL used when a caller does not supply one
    pub default_ttl: Duration,
    /// Local tier TTL as a fraction of the remote TTL
    pub local_ttl_ratio: f64,
    /// Process-wide cap on concurrent population calls
    pub pool_limit: usize,
    /// Upper bound on TTL for empty populated results
    pub negative_ttl: Duration,
    /// Items per batch read chunk (bounds one remote multi-get)
    pub read_chunk_size: usize,
    /// Keys per remote multi-set
    pub write_chunk_size: usize,
    /// TTLs at or above this receive jitter
    pub jitter_threshold: Duration,
    /// Maximum jitter as a percentage of the TTL
    pub jitter_percent: u8,
    /// Attempts per batch chunk
    pub batch_attempts: u32,
    /// Local tier expiry sweep interval
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(360),         // 6 minutes
            local_ttl_ratio: 0.5,
            pool_limit: 10,
            negative_ttl: Duration::from_secs(60),         // 1 minute
            read_chunk_size: 100,
            write_chunk_size: 100,
            jitter_threshold: Duration::from_secs(300),    // 5 minutes
            jitter_percent: 10,
            batch_attempts: 3,
            cleanup_interval: Duration::from_secs(60),     // Sweep every minute
        }
    }
}

impl CacheConfig {
    /// Local TTL paired with a remote TTL under the configured ratio
    pub fn local_ttl_for(&self, remote_ttl: Duration) -> Duration {
        remote_ttl.mul_f64(self.local_ttl_ratio)
    }

    /// TTL for a populated value, shortened when the value is an empty result
    pub fn ttl_for_result(&self, ttl: Duration, empty: bool) -> Duration {
        if empty {
            ttl.min(self.negative_ttl)
        } else {
            ttl
        }
    }
}
