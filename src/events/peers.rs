//! Cross-instance local tier invalidation
//!
//! The shared tier is consistent across instances after an invalidation, but
//! every peer's local tier may still hold the removed keys. The broadcaster
//! publishes each removal; the listener on every other node drops the keys
//! from its own local tier.
//!
//! ```text
//! Node A: invalidate_transaction → removed keys
//!   ↓
//! NATS: lintel.cache.invalidate {origin: A, keys}
//!   ↓
//! Node B: listener → local tier delete
//! Node A: listener ignores its own message
//! ```

use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::client::NatsClient;
use super::messages::InvalidationMessage;
use super::{next_backoff, INITIAL_BACKOFF};
use crate::invalidation::{InvalidatedKeys, InvalidationManager};
use crate::types::{GatewayError, Result};

/// Publishes keys removed on this node to peers
pub struct InvalidationBroadcaster {
    client: NatsClient,
    subject: String,
    node_id: Uuid,
}

impl InvalidationBroadcaster {
    pub fn new(client: NatsClient, subject: &str, node_id: Uuid) -> Self {
        Self {
            client,
            subject: subject.to_string(),
            node_id,
        }
    }

    pub async fn publish(&self, keys: Vec<String>) -> Result<()> {
        let count = keys.len();
        let payload = InvalidationMessage::new(self.node_id, keys).to_bytes()?;
        self.client.publish(&self.subject, payload).await?;
        debug!(subject = %self.subject, count = count, "Published invalidation");
        Ok(())
    }

    /// Forward every removal announced on `removed_rx` until shutdown
    pub fn spawn(
        self,
        mut removed_rx: broadcast::Receiver<InvalidatedKeys>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(subject = %self.subject, "Invalidation broadcaster started");

            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    removed = removed_rx.recv() => {
                        match removed {
                            Ok(removed) => {
                                if let Err(e) = self.publish(removed.keys).await {
                                    error!(error = %e, "Failed to publish invalidation");
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!(skipped = n, "Invalidation broadcaster lagged");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }

            info!("Invalidation broadcaster stopped");
        })
    }
}

/// Drops keys announced by peers from this node's local tier
pub struct PeerInvalidationListener {
    manager: Arc<InvalidationManager>,
    client: NatsClient,
    subject: String,
    node_id: Uuid,
}

impl PeerInvalidationListener {
    pub fn new(
        manager: Arc<InvalidationManager>,
        client: NatsClient,
        subject: &str,
        node_id: Uuid,
    ) -> Self {
        Self {
            manager,
            client,
            subject: subject.to_string(),
            node_id,
        }
    }

    /// Spawn the listener; resubscribes with exponential backoff
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff = INITIAL_BACKOFF;

            loop {
                let result = tokio::select! {
                    _ = shutdown.recv() => break,
                    result = self.run() => result,
                };

                if let Err(e) = result {
                    error!(
                        error = %e,
                        backoff_secs = backoff.as_secs(),
                        "Invalidation listener error, reconnecting"
                    );
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = next_backoff(backoff);
                }
            }

            info!(subject = %self.subject, "Invalidation listener stopped");
        })
    }

    async fn run(&self) -> Result<()> {
        let mut subscription = self.client.subscribe(&self.subject).await?;
        info!(subject = %self.subject, "Subscribed to peer invalidations");

        while let Some(message) = subscription.next().await {
            if let Err(e) = apply_peer_invalidation(&self.manager, self.node_id, &message.payload) {
                warn!(error = %e, "Failed to parse invalidation message");
            }
        }

        Err(GatewayError::Nats(format!("subscription to {} closed", self.subject)))
    }
}

/// Apply one peer message to the local tier; own messages are ignored.
/// Returns the number of local entries dropped.
pub fn apply_peer_invalidation(
    manager: &InvalidationManager,
    node_id: Uuid,
    payload: &[u8],
) -> Result<usize> {
    let message = InvalidationMessage::from_bytes(payload)?;
    if message.origin == node_id {
        return Ok(0);
    }

    let dropped = manager.invalidate_local(&message.keys);
    debug!(
        origin = %message.origin,
        keys = message.keys.len(),
        dropped = dropped,
        "Received peer invalidation"
    );
    Ok(dropped)
}
