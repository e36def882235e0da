//! Lintel - multi-tier read cache for Elohim ledger gateways
//!
//! Lintel sits between gateway request handlers and the upstream ledger
//! node/indexer services, answering repeated reads from cache and shielding
//! upstream from redundant load.
//!
//! ## Components
//!
//! - **Cache**: process-local tier + shared Redis tier, single-flight
//!   population, bounded batch population, TTL jitter
//! - **Invalidation**: declarative transaction → key rules applied to both tiers
//! - **Events**: NATS transaction feed and cross-instance local tier invalidation

pub mod cache;
pub mod config;
pub mod events;
pub mod invalidation;
pub mod types;

pub use cache::{BatchOptions, Cache, CacheConfig};
pub use config::Args;
pub use invalidation::{InvalidationManager, RuleSet, Transaction};
pub use types::{GatewayError, Result};
