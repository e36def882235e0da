//! Error types for Lintel
//!
//! Variants carry rendered messages so the error is `Clone`: single-flight
//! hands the same failure to every caller waiting on an operation key.

/// Main error type for cache and gateway operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Shared cache tier unreachable or command failed
    #[error("Cache error: {0}")]
    Cache(String),

    /// Caller-supplied population (upstream fetch/compute) failed
    #[error("Population failed: {0}")]
    Population(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Wrap any displayable upstream failure as a population error
    pub fn population(err: impl std::fmt::Display) -> Self {
        Self::Population(err.to_string())
    }

    /// Whether this failure came from the shared cache tier
    pub fn is_cache_failure(&self) -> bool {
        matches!(self, Self::Cache(_))
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON error: {}", err))
    }
}

impl From<redis::RedisError> for GatewayError {
    fn from(err: redis::RedisError) -> Self {
        Self::Cache(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for GatewayError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::Cache(format!("Redis pool: {}", err))
    }
}

impl From<deadpool_redis::CreatePoolError> for GatewayError {
    fn from(err: deadpool_redis::CreatePoolError) -> Self {
        Self::Config(format!("Redis pool: {}", err))
    }
}

impl From<async_nats::Error> for GatewayError {
    fn from(err: async_nats::Error) -> Self {
        Self::Nats(err.to_string())
    }
}

/// Result type alias for Lintel operations
pub type Result<T> = std::result::Result<T, GatewayError>;
