//! Shared types for Lintel

pub mod error;

pub use error::{GatewayError, Result};
