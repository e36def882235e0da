//! TTL jitter
//!
//! Spreads expiry of keys written together (cold start, mass invalidation).
//! TTLs at or above the threshold get a random signed offset of up to
//! `percent` of their length; shorter TTLs are returned unchanged.

use rand::Rng;
use std::time::Duration;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Jitter policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlJitter {
    /// TTLs at or above this receive jitter
    pub threshold: Duration,
    /// Maximum offset as a percentage of the TTL
    pub percent: u8,
}

impl Default for TtlJitter {
    fn default() -> Self {
        Self {
            threshold: Duration::from_secs(300),
            percent: 10,
        }
    }
}

impl TtlJitter {
    pub fn new(threshold: Duration, percent: u8) -> Self {
        Self { threshold, percent }
    }

    /// Spread a TTL given in whole seconds
    pub fn spread_secs(&self, ttl_secs: u64) -> u64 {
        if ttl_secs < self.threshold.as_secs() || self.percent == 0 {
            return ttl_secs;
        }

        let max_offset = (u128::from(ttl_secs) * u128::from(self.percent.min(100)) / 100) as u64;
        let low = ttl_secs - max_offset;
        let high = ttl_secs.saturating_add(max_offset);
        rand::thread_rng().gen_range(low..=high)
    }

    /// Spread a TTL, keeping sub-second precision
    pub fn spread(&self, ttl: Duration) -> Duration {
        if ttl < self.threshold || self.percent == 0 {
            return ttl;
        }

        let nanos = ttl.as_nanos();
        let max_offset = nanos * u128::from(self.percent.min(100)) / 100;
        let spread = rand::thread_rng().gen_range(nanos - max_offset..=nanos + max_offset);

        match u64::try_from(spread / NANOS_PER_SEC) {
            Ok(secs) => Duration::new(secs, (spread % NANOS_PER_SEC) as u32),
            Err(_) => Duration::MAX,
        }
    }
}
