//! Keylease Store - atomic primitives a lease lock is built from
//!
//! The lock protocol never talks to a backend directly; it goes through the
//! [`LockStore`] capability trait. Every method is a single atomic round trip
//! from the backend's point of view.
//!
//! Backends:
//! - [`MemoryStore`]: process-local store for tests and single-process use
//! - [`RedisStore`]: Redis, with Lua scripts for the compare-and-* primitives
//!   (behind the `redis` feature)

use std::time::Duration;

use async_trait::async_trait;

pub use keylease_common::{StoreError, StoreResult};

mod memory;
#[cfg(feature = "redis")]
mod redis_store;
#[cfg(feature = "redis")]
mod scripts;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::{RedisConfig, RedisStore};

/// Result of the one-round-trip health query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreHealth {
    /// Whether the key exists
    pub exists: bool,
    /// Remaining lease in milliseconds; zero or negative when there is none
    pub ttl_ms: i64,
    /// Whether the stored value equals the expected owner token
    pub is_owner: bool,
}

impl StoreHealth {
    pub const ABSENT: StoreHealth = StoreHealth {
        exists: false,
        ttl_ms: 0,
        is_owner: false,
    };
}

/// Atomic key-value primitives consumed by the lock
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Liveness probe
    async fn ping(&self) -> StoreResult<()>;

    /// Create `key = value` with a lease of `ttl` unless the key exists
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// Delete `key` only if its value equals `expected`
    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool>;

    /// Reset the lease of `key` to `ttl` only if its value equals `expected`
    async fn compare_and_extend(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> StoreResult<bool>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Unconditional delete
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Remaining lease, `None` when the key is absent or has no expiry
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// Existence, remaining lease and ownership in one atomic step
    async fn health(&self, key: &str, expected: &str) -> StoreResult<StoreHealth>;
}
