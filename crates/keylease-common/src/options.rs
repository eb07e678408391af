//! Lock options
//!
//! Defaults are applied once by [`LockOptions::normalized`] when a lock handle
//! is constructed; a handle never re-defaults its options afterwards.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_TTL_MS: u64 = 30_000;
pub const DEFAULT_RETRY_COUNT: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 10_000;

/// Tunables of a lock handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockOptions {
    /// Lease length granted on each acquire / refresh, in milliseconds
    pub ttl_ms: u64,
    /// Retries performed by `lock_with_options`
    pub retry_count: u32,
    /// Initial backoff delay for `lock_with_options`, in milliseconds
    pub retry_delay_ms: u64,
    /// Auto-refresh period, in milliseconds
    pub refresh_interval_ms: u64,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl_ms: DEFAULT_TTL_MS,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
        }
    }
}

impl LockOptions {
    /// Replace zero fields with their defaults
    pub fn normalized(mut self) -> Self {
        if self.ttl_ms == 0 {
            self.ttl_ms = DEFAULT_TTL_MS;
        }
        if self.retry_count == 0 {
            self.retry_count = DEFAULT_RETRY_COUNT;
        }
        if self.retry_delay_ms == 0 {
            self.retry_delay_ms = DEFAULT_RETRY_DELAY_MS;
        }
        if self.refresh_interval_ms == 0 {
            self.refresh_interval_ms = DEFAULT_REFRESH_INTERVAL_MS;
        }
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = ttl.as_millis() as u64;
        self
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}
