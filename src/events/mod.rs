//! NATS event plumbing
//!
//! - [`TransactionSubscriber`]: processed ledger transactions → invalidation
//! - [`InvalidationBroadcaster`]: keys removed here → peers
//! - [`PeerInvalidationListener`]: keys removed by peers → local tier
//!
//! Subscriptions that end or fail are re-established with exponential
//! backoff, starting at one second and capped at five minutes.

pub mod client;
pub mod messages;
pub mod peers;
pub mod subscriber;

pub use client::NatsClient;
pub use messages::InvalidationMessage;
pub use peers::{apply_peer_invalidation, InvalidationBroadcaster, PeerInvalidationListener};
pub use subscriber::{process_transaction_event, TransactionSubscriber};

use std::time::Duration;

pub(crate) const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

pub(crate) const MAX_BACKOFF: Duration = Duration::from_secs(300);

pub(crate) fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}
