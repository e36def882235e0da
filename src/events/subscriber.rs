//! Transaction subscriber
//!
//! Consumes processed-transaction events from NATS and runs them through the
//! [`InvalidationManager`]. The subscription is re-established with
//! exponential backoff whenever it ends or fails.

use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::client::NatsClient;
use super::{next_backoff, INITIAL_BACKOFF};
use crate::invalidation::{InvalidationManager, Transaction};
use crate::types::{GatewayError, Result};

pub struct TransactionSubscriber {
    manager: Arc<InvalidationManager>,
    client: NatsClient,
    subject: String,
}

impl TransactionSubscriber {
    pub fn new(manager: Arc<InvalidationManager>, client: NatsClient, subject: &str) -> Self {
        Self {
            manager,
            client,
            subject: subject.to_string(),
        }
    }

    /// Spawn the subscription loop; stops on `shutdown`
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
                        "Transaction subscription failed, reconnecting"
                    );
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = next_backoff(backoff);
                }
            }

            info!(subject = %self.subject, "Transaction subscriber stopped");
        })
    }

    async fn run(&self) -> Result<()> {
        let mut subscription = self.client.subscribe(&self.subject).await?;
        info!(subject = %self.subject, "Subscribed to transactions");

        while let Some(message) = subscription.next().await {
            // Per-message failures are logged; the subscription carries on
            if let Err(e) = self.handle_message(&message.payload).await {
                warn!(subject = %self.subject, error = %e, "Failed to process transaction event");
            }
        }

        Err(GatewayError::Nats(format!("subscription to {} closed", self.subject)))
    }

    pub async fn handle_message(&self, payload: &[u8]) -> Result<Vec<String>> {
        process_transaction_event(&self.manager, payload).await
    }
}

/// Decode one transaction event and invalidate what it affects
pub async fn process_transaction_event(
    manager: &InvalidationManager,
    payload: &[u8],
) -> Result<Vec<String>> {
    let tx = Transaction::from_bytes(payload)?;
    let removed = manager.invalidate_transaction(&tx).await?;
    debug!(
        sender = %tx.sender,
        receiver = %tx.receiver,
        removed = removed.len(),
        "Processed transaction event"
    );
    Ok(removed)
}
