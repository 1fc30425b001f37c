//! Session cache configuration.

use std::time::Duration;

const DEFAULT_TTL_SECS: u64 = 120;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_STALE_MULTIPLIER: u32 = 2;

/// Timing knobs for the per-session cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// How long an entry stays valid after it was last written.
    pub ttl: Duration,
    /// Cadence of the background sweep.
    pub sweep_interval: Duration,
    /// Entries older than `ttl * stale_multiplier` are removed by the sweep.
    pub stale_multiplier: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            stale_multiplier: DEFAULT_STALE_MULTIPLIER,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            ttl: settings.ttl,
            sweep_interval: settings.sweep_interval,
            stale_multiplier: settings.stale_multiplier.get(),
        }
    }
}

impl CacheConfig {
    /// Age past which the sweep drops an entry.
    pub fn evict_after(&self) -> Duration {
        self.ttl.saturating_mul(self.stale_multiplier.max(1))
    }
}
