//! Peer invalidation messages

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{GatewayError, Result};

/// Keys a node removed, announced so peers drop them from their local tiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    /// Node that performed the invalidation
    pub origin: Uuid,
    pub keys: Vec<String>,
}

impl InvalidationMessage {
    pub fn new(origin: Uuid, keys: Vec<String>) -> Self {
        Self { origin, keys }
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<bytes::Bytes> {
        serde_json::to_vec(self).map(Into::into).map_err(GatewayError::from)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(GatewayError::from)
    }
}
