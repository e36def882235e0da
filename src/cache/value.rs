//! Cached value representation
//!
//! Values are schema-free JSON: null, bool, number, string, ordered list or
//! string-keyed map. The remote tier stores them as JSON text; typed callers
//! convert through serde at the facade.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::types::Result;

/// Tagged union stored in both tiers
pub type CacheValue = serde_json::Value;

/// Whether a populated value counts as "no data" for negative-result TTLs.
///
/// Empty-but-valid results (zero balance, empty list) match too. Call sites
/// can change or disable the bound through `BatchOptions`.
pub fn is_empty_result(value: &CacheValue) -> bool {
    match value {
        CacheValue::Null => true,
        CacheValue::Bool(b) => !b,
        CacheValue::Number(n) => n.as_f64() == Some(0.0),
        CacheValue::String(s) => s.is_empty(),
        CacheValue::Array(items) => items.is_empty(),
        CacheValue::Object(map) => map.is_empty(),
    }
}

/// Convert a typed value into its cached form
pub fn encode<T: Serialize>(value: &T) -> Result<CacheValue> {
    Ok(serde_json::to_value(value)?)
}

/// Convert a cached value into the caller's type.
///
/// A value that no longer fits the type (schema drift between deploys) is
/// reported as absent so the caller repopulates it.
pub fn decode<T: DeserializeOwned>(key: &str, value: CacheValue) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(typed) => Some(typed),
        Err(e) => {
            warn!(
                key = key,
                error = %e,
                "Cached value does not match requested type, treating as miss"
            );
            None
        }
    }
}
