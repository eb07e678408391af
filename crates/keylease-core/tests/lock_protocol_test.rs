//! End-to-end lock protocol tests against the in-memory store
//!
//! Time-sensitive scenarios run on tokio's paused clock so lease expiry is
//! deterministic.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use keylease_core::{Context, LockError, LockHandle, LockScope, LockState};
use keylease_store::{LockStore, MemoryStore, StoreHealth, StoreResult};

/// Wraps a store and counts acquisition attempts
struct CountingStore {
    inner: MemoryStore,
    acquire_attempts: AtomicU32,
}

impl CountingStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            acquire_attempts: AtomicU32::new(0),
        }
    }

    fn attempts(&self) -> u32 {
        self.acquire_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LockStore for CountingStore {
    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        self.acquire_attempts.fetch_add(1, Ordering::SeqCst);
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        self.inner.compare_and_delete(key, expected).await
    }

    async fn compare_and_extend(&self, key: &str, expected: &str, ttl: Duration) -> StoreResult<bool> {
        self.inner.compare_and_extend(key, expected, ttl).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.inner.exists(key).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.inner.delete(key).await
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        self.inner.ttl(key).await
    }

    async fn health(&self, key: &str, expected: &str) -> StoreResult<StoreHealth> {
        self.inner.health(key, expected).await
    }
}

/// Hands the key to another owner right after each health read
struct TakeoverStore {
    inner: MemoryStore,
}

#[async_trait]
impl LockStore for TakeoverStore {
    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        self.inner.compare_and_delete(key, expected).await
    }

    async fn compare_and_extend(&self, key: &str, expected: &str, ttl: Duration) -> StoreResult<bool> {
        self.inner.compare_and_extend(key, expected, ttl).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.inner.exists(key).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.inner.delete(key).await
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        self.inner.ttl(key).await
    }

    async fn health(&self, key: &str, expected: &str) -> StoreResult<StoreHealth> {
        let health = self.inner.health(key, expected).await?;
        self.inner.delete(key).await?;
        self.inner
            .set_if_absent(key, "intruder", Duration::from_secs(30))
            .await?;
        Ok(health)
    }
}

#[tokio::test(start_paused = true)]
async fn test_job_lease_handover_after_expiry() {
    let store = Arc::new(MemoryStore::new());
    let ttl = Duration::from_secs(2);
    let a = LockHandle::new(store.clone(), "job:42", "A", ttl).await.unwrap();
    let b = LockHandle::new(store.clone(), "job:42", "B", ttl).await.unwrap();
    let ctx = Context::background();

    a.lock(&ctx).await.unwrap();
    assert!(matches!(b.lock(&ctx).await, Err(LockError::LockNotObtained)));

    tokio::time::sleep(Duration::from_millis(2500)).await;

    b.lock(&ctx).await.unwrap();
    assert!(b.is_held_by_me(&ctx).await.unwrap());

    assert!(matches!(a.unlock(&ctx).await, Err(LockError::LockNotHeld)));
    assert_eq!(a.state(), LockState::Expired);
    // A's failed release left B's lease alone
    assert_eq!(store.get("job:42").await.unwrap().as_deref(), Some("B"));
}

#[tokio::test]
async fn test_concurrent_handles_single_winner() {
    let store = Arc::new(MemoryStore::new());
    let mut tasks = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let handle = LockHandle::new(store, "shared", format!("owner-{}", i), Duration::from_secs(30))
                .await
                .unwrap();
            handle.lock(&Context::background()).await.is_ok()
        }));
    }

    let mut winners = 0;
    for task in tasks {
        if task.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_repeat_lock_is_local() {
    let store = Arc::new(CountingStore::new());
    let lock = LockHandle::new(store.clone(), "res", "owner", Duration::from_secs(30))
        .await
        .unwrap();
    let ctx = Context::background();

    lock.lock(&ctx).await.unwrap();
    assert!(matches!(lock.lock(&ctx).await, Err(LockError::AlreadyLocked)));
    assert_eq!(store.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_attempt_budget() {
    let store = Arc::new(CountingStore::new());
    store
        .set_if_absent("res", "holder", Duration::from_secs(60))
        .await
        .unwrap();
    let lock = LockHandle::new(store.clone(), "res", "waiter", Duration::from_secs(30))
        .await
        .unwrap();
    let (ctx, _canceller) = Context::background().with_cancel();

    let err = lock
        .lock_with_retry(&ctx, 4, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::LockNotObtained));
    // One seeding call plus max_retries + 1 attempts
    assert_eq!(store.attempts(), 1 + 5);
}

#[tokio::test(start_paused = true)]
async fn test_auto_refresh_outlives_ttl() {
    let store = Arc::new(MemoryStore::new());
    let lock = Arc::new(
        LockHandle::new(store.clone(), "res", "owner", Duration::from_millis(600))
            .await
            .unwrap(),
    );
    let ctx = Context::background();
    lock.lock(&ctx).await.unwrap();

    let (errors, stopper) = lock.auto_refresh(&ctx, Duration::from_millis(200));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(lock.is_held_by_me(&ctx).await.unwrap());

    stopper.stop();
    assert!(errors.await.is_err());

    // Without renewal the lease lapses
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!lock.is_locked(&ctx).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_auto_refresh_outage_single_error() {
    let store = Arc::new(MemoryStore::new());
    let lock = Arc::new(
        LockHandle::new(store.clone(), "res", "owner", Duration::from_secs(3))
            .await
            .unwrap(),
    );
    lock.lock(&Context::background()).await.unwrap();

    let (mut errors, _stopper) = lock.auto_refresh(&Context::background(), Duration::from_secs(1));
    store.set_unavailable(true);
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let first = errors.try_recv().unwrap();
    assert!(matches!(first, LockError::Store { .. }));
    assert!(errors.try_recv().is_err());
}

#[tokio::test]
async fn test_cleanup_and_force_unlock_ownership_rules() {
    let store = Arc::new(MemoryStore::new());
    let ttl = Duration::from_secs(30);
    let owner = LockHandle::new(store.clone(), "res", "owner", ttl).await.unwrap();
    let admin = LockHandle::new(store.clone(), "res", "admin", ttl).await.unwrap();
    let ctx = Context::background();

    owner.lock(&ctx).await.unwrap();
    assert!(matches!(admin.cleanup(&ctx).await, Err(LockError::LockNotHeld)));
    assert!(owner.is_held_by_me(&ctx).await.unwrap());

    admin.force_unlock(&ctx).await.unwrap();
    assert!(!owner.is_locked(&ctx).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_scope_with_auto_refresh() {
    let store = Arc::new(MemoryStore::new());
    let lock = Arc::new(
        LockHandle::new(store.clone(), "job:7", "worker", Duration::from_millis(500))
            .await
            .unwrap(),
    );
    let ctx = Context::background().with_timeout(Duration::from_secs(10));
    let scope = LockScope::new(lock.clone(), ctx.clone());

    let result: Result<u32, LockError> = scope
        .run(|| {
            let lock = lock.clone();
            let ctx = ctx.clone();
            async move {
                let (_errors, stopper) = lock.auto_refresh(&ctx, Duration::ZERO);
                tokio::time::sleep(Duration::from_secs(2)).await;
                let held = lock.is_held_by_me(&ctx).await?;
                stopper.stop();
                Ok(if held { 1 } else { 0 })
            }
        })
        .await;

    assert_eq!(result.unwrap(), 1);
    assert!(!store.exists("job:7").await.unwrap());
}

#[tokio::test]
async fn test_cleanup_spares_key_taken_over_after_check() {
    let store = Arc::new(TakeoverStore {
        inner: MemoryStore::new(),
    });
    let lock = LockHandle::new(store.clone(), "res", "owner", Duration::from_secs(30))
        .await
        .unwrap();
    let ctx = Context::background();
    lock.lock(&ctx).await.unwrap();

    let err = lock.cleanup(&ctx).await.unwrap_err();
    assert!(matches!(err, LockError::LockNotHeld));
    assert_eq!(store.get("res").await.unwrap().as_deref(), Some("intruder"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_unlock_single_release() {
    let store = Arc::new(MemoryStore::new());
    let lock = Arc::new(
        LockHandle::new(store.clone(), "shared", "owner", Duration::from_secs(30))
            .await
            .unwrap(),
    );
    lock.lock(&Context::background()).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let lock = lock.clone();
        tasks.push(tokio::spawn(async move {
            lock.unlock(&Context::background()).await
        }));
    }

    let mut released = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => released += 1,
            Err(e) => assert!(matches!(e, LockError::LockNotHeld), "unexpected error: {e}"),
        }
    }
    assert_eq!(released, 1);
    assert_eq!(lock.state(), LockState::Unlocked);
    assert!(!store.exists("shared").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_unlock_while_auto_refresh_ticks() {
    let store = Arc::new(MemoryStore::new());
    let lock = Arc::new(
        LockHandle::new(store.clone(), "job:9", "worker", Duration::from_secs(3))
            .await
            .unwrap(),
    );
    let ctx = Context::background();
    lock.lock(&ctx).await.unwrap();

    let (errors, _stopper) = lock.auto_refresh(&ctx, Duration::from_secs(1));
    tokio::time::sleep(Duration::from_millis(1500)).await;

    lock.unlock(&ctx).await.unwrap();
    assert!(!store.exists("job:9").await.unwrap());

    // The next tick finds the key gone
    assert!(matches!(errors.await.unwrap(), LockError::LockNotHeld));
    assert!(!store.exists("job:9").await.unwrap());
    assert_eq!(lock.state(), LockState::Unlocked);
}
