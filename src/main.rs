//! Lintel - multi-tier read cache for Elohim ledger gateways

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lintel::{
    cache::{spawn_cleanup_task, Cache, MemoryStore, RedisStore, RemoteStore},
    config::Args,
    events::{InvalidationBroadcaster, NatsClient, PeerInvalidationListener, TransactionSubscriber},
    invalidation::{InvalidationManager, RuleSet},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    init_tracing(&args);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let cache_config = args.cache_config();

    info!("======================================");
    info!("  Lintel - Ledger Gateway Cache");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Redis: {}", args.redis.redis_url);
    info!("NATS: {}", args.nats.nats_url);
    info!(
        "Default TTL: {}s (local ratio {})",
        cache_config.default_ttl.as_secs(),
        cache_config.local_ttl_ratio
    );
    info!("Population pool: {}", cache_config.pool_limit);
    info!("======================================");

    // Shared tier (in-memory fallback in dev mode)
    let store: Arc<dyn RemoteStore> = match RedisStore::connect(
        &args.redis.redis_url,
        args.redis.redis_pool_size,
        Duration::from_millis(args.redis.redis_timeout_ms),
    )
    .await
    {
        Ok(store) => Arc::new(store),
        Err(e) => {
            if args.dev_mode {
                warn!("Redis connection failed (dev mode, using in-memory shared tier): {}", e);
                Arc::new(MemoryStore::new())
            } else {
                error!("Redis connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let cache = Arc::new(Cache::new(store, cache_config.clone()));
    let cleanup_handle =
        spawn_cleanup_task(Arc::clone(cache.local()), cache_config.cleanup_interval);

    let rules = match &args.invalidation_rules {
        Some(path) => RuleSet::load(path)?,
        None => {
            info!("Using built-in invalidation rules");
            RuleSet::defaults()
        }
    };
    let manager = Arc::new(InvalidationManager::new(Arc::clone(&cache), rules));

    // NATS (optional in dev mode)
    let nats = match NatsClient::connect(&args.nats, &format!("lintel-{}", args.node_id)).await {
        Ok(client) => Some(client),
        Err(e) => {
            if args.dev_mode {
                warn!("NATS connection failed (dev mode, continuing without): {}", e);
                None
            } else {
                error!("NATS connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut handles = Vec::new();

    if let Some(client) = nats {
        let transactions = TransactionSubscriber::new(
            Arc::clone(&manager),
            client.clone(),
            &args.nats.transactions_subject,
        );
        handles.push(transactions.spawn(shutdown_tx.subscribe()));

        let broadcaster = InvalidationBroadcaster::new(
            client.clone(),
            &args.nats.invalidate_subject,
            args.node_id,
        );
        handles.push(broadcaster.spawn(manager.subscribe(), shutdown_tx.subscribe()));

        let listener = PeerInvalidationListener::new(
            Arc::clone(&manager),
            client,
            &args.nats.invalidate_subject,
            args.node_id,
        );
        handles.push(listener.spawn(shutdown_tx.subscribe()));
        info!(
            transactions = %args.nats.transactions_subject,
            invalidations = %args.nats.invalidate_subject,
            "Event processing started"
        );
    } else {
        warn!("Running without NATS: transaction-driven invalidation disabled");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(());
    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }
    cleanup_handle.abort();

    let stats = cache.stats();
    info!(
        entries = stats.local.entries,
        hit_rate = stats.local.hit_rate(),
        "Lintel stopped"
    );

    Ok(())
}

fn init_tracing(args: &Args) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("lintel={},info", args.log_level).into());

    if args.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
