//! Event-driven cache invalidation
//!
//! Processed ledger transactions are matched against declarative rules
//! ([`rules`]); each match yields exact keys or key patterns that the
//! [`InvalidationManager`] removes from both tiers.

pub mod manager;
pub mod rules;
pub mod transaction;

pub use manager::{InvalidatedKeys, InvalidationManager};
pub use rules::{InvalidationRule, InvalidationTarget, ReceiverMatcher, RuleSet};
pub use transaction::{FunctionCall, Transaction, TransactionEvent};
