// In-memory lock store
// Process-local implementation of the store primitives with lazy expiry

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;
use tracing::debug;

use crate::{LockStore, StoreError, StoreHealth, StoreResult};

/// A stored value with its lease deadline
struct LeaseEntry {
    value: String,
    expires_at: Instant,
}

impl LeaseEntry {
    fn new(value: &str, ttl: Duration) -> Self {
        Self {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

/// In-memory lock store backed by DashMap
///
/// Every primitive runs under the map's shard lock for the key, so each call
/// is atomic with respect to the others. Expired entries are treated as absent
/// and removed lazily; [`MemoryStore::with_cleanup`] adds a periodic sweep.
///
/// Time is read from `tokio::time`, so tests with a paused clock control
/// lease expiry deterministically.
pub struct MemoryStore {
    entries: Arc<DashMap<String, LeaseEntry>>,
    /// Number of primitive calls served or rejected
    round_trips: AtomicU64,
    /// Fault injection switch: when set every call fails as unreachable
    unavailable: AtomicBool,
    /// Background sweeper handle
    cleanup_handle: Option<tokio::task::JoinHandle<()>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            round_trips: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
            cleanup_handle: None,
        }
    }

    /// Start a background task that purges expired entries every `interval`
    pub fn with_cleanup(mut self, interval: Duration) -> Self {
        let entries = self.entries.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let purged = Self::purge(&entries);
                if purged > 0 {
                    debug!(count = purged, "Purged expired lock entries");
                }
            }
        });
        self.cleanup_handle = Some(handle);
        self
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        Self::purge(&self.entries)
    }

    fn purge(entries: &DashMap<String, LeaseEntry>) -> usize {
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(entries.len())
    }

    /// Total number of primitive calls made against this store
    pub fn round_trips(&self) -> u64 {
        self.round_trips.load(Ordering::Relaxed)
    }

    /// Simulate an outage (`true`) or recovery (`false`)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn round_trip(&self, op: &'static str) -> StoreResult<Instant> {
        self.round_trips.fetch_add(1, Ordering::Relaxed);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!(
                "memory store offline during {}",
                op
            )));
        }
        Ok(Instant::now())
    }

    /// Drop `key` if its lease has lapsed
    fn evict_if_expired(&self, key: &str, now: Instant) {
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup_handle.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.round_trip("ping").map(|_| ())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let now = self.round_trip("set_if_absent")?;

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(LeaseEntry::new(value, ttl));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(LeaseEntry::new(value, ttl));
                Ok(true)
            }
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let now = self.round_trip("compare_and_delete")?;

        let removed = self
            .entries
            .remove_if(key, |_, entry| {
                !entry.is_expired(now) && entry.value == expected
            })
            .is_some();
        if !removed {
            self.evict_if_expired(key, now);
        }
        Ok(removed)
    }

    async fn compare_and_extend(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let now = self.round_trip("compare_and_extend")?;

        let extended = match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) && entry.value == expected => {
                entry.expires_at = now + ttl;
                true
            }
            _ => false,
        };
        if !extended {
            self.evict_if_expired(key, now);
        }
        Ok(extended)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let now = self.round_trip("exists")?;
        self.evict_if_expired(key, now);
        Ok(self.entries.contains_key(key))
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = self.round_trip("get")?;
        self.evict_if_expired(key, now);
        Ok(self.entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.round_trip("delete")?;
        self.entries.remove(key);
        Ok(())
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let now = self.round_trip("ttl")?;
        self.evict_if_expired(key, now);
        Ok(self.entries.get(key).map(|entry| entry.remaining(now)))
    }

    async fn health(&self, key: &str, expected: &str) -> StoreResult<StoreHealth> {
        let now = self.round_trip("health")?;
        self.evict_if_expired(key, now);

        Ok(match self.entries.get(key) {
            Some(entry) => StoreHealth {
                exists: true,
                ttl_ms: entry.remaining(now).as_millis() as i64,
                is_owner: entry.value == expected,
            },
            None => StoreHealth::ABSENT,
        })
    }
}
