//! Configuration for Lintel
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::cache::CacheConfig;
use crate::types::GatewayError;

/// Lintel - multi-tier read cache in front of ledger node and indexer services
#[derive(Parser, Debug, Clone)]
#[command(name = "lintel")]
#[command(about = "Multi-tier read cache for Elohim ledger gateways")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Enable development mode (in-memory shared tier, NATS optional)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format ("pretty" or "json")
    #[arg(long, env = "LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// JSON file with invalidation rules (built-in defaults when unset)
    #[arg(long, env = "INVALIDATION_RULES")]
    pub invalidation_rules: Option<PathBuf>,

    /// Cache tuning
    #[command(flatten)]
    pub cache: CacheArgs,

    /// Shared tier connection
    #[command(flatten)]
    pub redis: RedisArgs,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,
}

/// Cache tuning knobs
#[derive(Parser, Debug, Clone)]
pub struct CacheArgs {
    /// Default TTL for cached values in seconds
    #[arg(long, env = "CACHE_TTL_SECS", default_value = "360")]
    pub cache_ttl_secs: u64,

    /// Local tier TTL as a fraction of the remote TTL
    #[arg(long, env = "CACHE_LOCAL_TTL_RATIO", default_value = "0.5")]
    pub local_ttl_ratio: f64,

    /// Maximum concurrent population calls across all batches
    #[arg(long, env = "CACHE_POOL_LIMIT", default_value = "10")]
    pub pool_limit: usize,

    /// Upper bound on TTL for empty populated results, in seconds
    #[arg(long, env = "CACHE_NEGATIVE_TTL_SECS", default_value = "60")]
    pub negative_ttl_secs: u64,

    /// Items per chunk for batch reads
    #[arg(long, env = "CACHE_READ_CHUNK_SIZE", default_value = "100")]
    pub read_chunk_size: usize,

    /// Keys per remote multi-set for batch writes
    #[arg(long, env = "CACHE_WRITE_CHUNK_SIZE", default_value = "100")]
    pub write_chunk_size: usize,

    /// TTLs at or above this many seconds receive jitter
    #[arg(long, env = "CACHE_JITTER_THRESHOLD_SECS", default_value = "300")]
    pub jitter_threshold_secs: u64,

    /// Maximum jitter as a percentage of the TTL
    #[arg(long, env = "CACHE_JITTER_PERCENT", default_value = "10")]
    pub jitter_percent: u8,

    /// Attempts per batch chunk before the batch fails
    #[arg(long, env = "CACHE_BATCH_ATTEMPTS", default_value = "3")]
    pub batch_attempts: u32,

    /// Interval between local tier expiry sweeps in seconds
    #[arg(long, env = "CACHE_CLEANUP_INTERVAL_SECS", default_value = "60")]
    pub cleanup_interval_secs: u64,
}

/// Shared tier (Redis protocol) connection configuration
#[derive(Parser, Debug, Clone)]
pub struct RedisArgs {
    /// Redis connection URL
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Maximum pooled connections
    #[arg(long, env = "REDIS_POOL_SIZE", default_value = "16")]
    pub redis_pool_size: usize,

    /// Pool wait/create/recycle timeout in milliseconds
    #[arg(long, env = "REDIS_TIMEOUT_MS", default_value = "2000")]
    pub redis_timeout_ms: u64,
}

/// NATS connection configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,

    /// Subject carrying processed ledger transactions
    #[arg(long, env = "TRANSACTIONS_SUBJECT", default_value = "lintel.transactions")]
    pub transactions_subject: String,

    /// Subject used to broadcast local tier invalidations between instances
    #[arg(long, env = "INVALIDATE_SUBJECT", default_value = "lintel.cache.invalidate")]
    pub invalidate_subject: String,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), GatewayError> {
        let cache = &self.cache;

        if cache.pool_limit == 0 {
            return Err(GatewayError::Config("CACHE_POOL_LIMIT must be at least 1".into()));
        }

        if cache.read_chunk_size == 0 || cache.write_chunk_size == 0 {
            return Err(GatewayError::Config("Chunk sizes must be at least 1".into()));
        }

        if !(cache.local_ttl_ratio > 0.0 && cache.local_ttl_ratio <= 1.0) {
            return Err(GatewayError::Config(format!(
                "CACHE_LOCAL_TTL_RATIO must be in (0, 1], got {}",
                cache.local_ttl_ratio
            )));
        }

        if cache.jitter_percent > 100 {
            return Err(GatewayError::Config(format!(
                "CACHE_JITTER_PERCENT must be at most 100, got {}",
                cache.jitter_percent
            )));
        }

        if cache.batch_attempts == 0 {
            return Err(GatewayError::Config("CACHE_BATCH_ATTEMPTS must be at least 1".into()));
        }

        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            return Err(GatewayError::Config(format!(
                "LOG_FORMAT must be 'pretty' or 'json', got '{}'",
                self.log_format
            )));
        }

        Ok(())
    }

    /// Runtime cache configuration derived from the arguments
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::from(&self.cache)
    }
}

impl From<&CacheArgs> for CacheConfig {
    fn from(args: &CacheArgs) -> Self {
        Self {
            default_ttl: Duration::from_secs(args.cache_ttl_secs),
            local_ttl_ratio: args.local_ttl_ratio,
            pool_limit: args.pool_limit,
            negative_ttl: Duration::from_secs(args.negative_ttl_secs),
            read_chunk_size: args.read_chunk_size,
            write_chunk_size: args.write_chunk_size,
            jitter_threshold: Duration::from_secs(args.jitter_threshold_secs),
            jitter_percent: args.jitter_percent,
            batch_attempts: args.batch_attempts,
            cleanup_interval: Duration::from_secs(args.cleanup_interval_secs),
        }
    }
}
