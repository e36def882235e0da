//! NATS client wrapper
//!
//! Thin connection handle shared by the transaction subscriber, the peer
//! invalidation listener and the broadcaster.

use async_nats::{Client, ConnectOptions};
use bytes::Bytes;
use std::time::Duration;
use tracing::info;

use crate::config::NatsArgs;
use crate::types::{GatewayError, Result};

/// Default ping interval for keep-alive
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// NATS client wrapper
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
    name: String,
}

impl NatsClient {
    /// Connect to the configured server.
    ///
    /// The initial connect fails fast; once connected, the client reconnects
    /// on its own.
    pub async fn connect(args: &NatsArgs, name: &str) -> Result<Self> {
        info!(url = %args.nats_url, name = name, "Connecting to NATS");

        let mut options = ConnectOptions::new()
            .name(name)
            .ping_interval(DEFAULT_PING_INTERVAL)
            .connection_timeout(CONNECT_TIMEOUT);

        if let (Some(user), Some(pass)) = (&args.nats_user, &args.nats_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&args.nats_url)
            .await
            .map_err(|e| GatewayError::Nats(format!("Failed to connect: {}", e)))?;

        info!(url = %args.nats_url, "Connected to NATS");

        Ok(Self {
            client,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| GatewayError::Nats(format!("Publish failed: {}", e)))
    }

    pub async fn subscribe(&self, subject: &str) -> Result<async_nats::Subscriber> {
        self.client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| GatewayError::Nats(format!("Subscribe to {} failed: {}", subject, e)))
    }
}
