//! Lock handle
//!
//! A [`LockHandle`] binds one store, one key, one owner token and one TTL. It
//! implements the four primitive operations every higher-level helper is
//! built on: acquire, release, refresh and ownership reads.
//!
//! Each primitive performs the cheap local compare-and-swap first and rolls it
//! back as soon as the remote call fails or reports non-ownership, so the local
//! state never claims something the store does not also believe (apart from the
//! lease-expiry race, which the next remote call resolves).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use keylease_common::{Context, LockError, LockOptions, LockResult};
use keylease_store::LockStore;

use crate::metrics;
use crate::state::{AtomicLockState, LockState};

/// A lease lock over one key in a shared store
pub struct LockHandle {
    store: Arc<dyn LockStore>,
    key: String,
    token: String,
    ttl: Duration,
    options: LockOptions,
    pub(crate) state: AtomicLockState,
}

impl LockHandle {
    /// Create a handle, validating arguments and probing the store once
    pub async fn new(
        store: Arc<dyn LockStore>,
        key: impl Into<String>,
        token: impl Into<String>,
        ttl: Duration,
    ) -> LockResult<Self> {
        let options = LockOptions::default().with_ttl(ttl);
        Self::build(store, key.into(), token.into(), ttl, options).await
    }

    /// Create a handle whose TTL and retry settings come from `options`
    pub async fn with_options(
        store: Arc<dyn LockStore>,
        key: impl Into<String>,
        token: impl Into<String>,
        options: LockOptions,
    ) -> LockResult<Self> {
        let options = options.normalized();
        let ttl = options.ttl();
        Self::build(store, key.into(), token.into(), ttl, options).await
    }

    /// Create a handle with a freshly generated UUID v4 token
    pub async fn with_random_token(
        store: Arc<dyn LockStore>,
        key: impl Into<String>,
        ttl: Duration,
    ) -> LockResult<Self> {
        Self::new(store, key, Self::generate_token(), ttl).await
    }

    /// A fresh owner token (UUID v4)
    pub fn generate_token() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    async fn build(
        store: Arc<dyn LockStore>,
        key: String,
        token: String,
        ttl: Duration,
        options: LockOptions,
    ) -> LockResult<Self> {
        if key.is_empty() {
            return Err(LockError::KeyRequired);
        }
        if token.is_empty() {
            return Err(LockError::TokenRequired);
        }
        if ttl.is_zero() {
            return Err(LockError::InvalidTtl);
        }
        store.ping().await.map_err(LockError::StoreUnreachable)?;

        Ok(Self {
            store,
            key,
            token,
            ttl,
            options,
            state: AtomicLockState::new(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// Local belief about ownership; not authoritative
    pub fn state(&self) -> LockState {
        self.state.load()
    }

    pub(crate) fn store(&self) -> &dyn LockStore {
        self.store.as_ref()
    }

    /// Try to acquire the lock once
    ///
    /// Returns [`LockError::AlreadyLocked`] without touching the store when the
    /// handle already believes it holds the lock, and
    /// [`LockError::LockNotObtained`] when another owner holds the key.
    pub async fn lock(&self, ctx: &Context) -> LockResult<()> {
        let result = self.try_lock(ctx).await;
        metrics::record_acquire(&result);
        result
    }

    async fn try_lock(&self, ctx: &Context) -> LockResult<()> {
        if !self.state.transition(LockState::Unlocked, LockState::Locked)
            && !self.state.transition(LockState::Expired, LockState::Locked)
        {
            return Err(LockError::AlreadyLocked);
        }

        let created = ctx
            .run(self.store.set_if_absent(&self.key, &self.token, self.ttl))
            .await;

        match created {
            Ok(Ok(true)) => {
                debug!(key = %self.key, ttl_ms = self.ttl.as_millis() as u64, "Lock acquired");
                Ok(())
            }
            Ok(Ok(false)) => {
                self.state.transition(LockState::Locked, LockState::Unlocked);
                debug!(key = %self.key, "Lock held by another owner");
                Err(LockError::LockNotObtained)
            }
            Ok(Err(e)) => {
                self.state.transition(LockState::Locked, LockState::Unlocked);
                Err(LockError::store("acquire lock", e))
            }
            Err(ctx_err) => {
                self.state.transition(LockState::Locked, LockState::Unlocked);
                Err(ctx_err)
            }
        }
    }

    /// Release the lock if the store still carries this handle's token
    ///
    /// A lease that lapsed or was taken over leaves the handle `Expired` and
    /// returns [`LockError::LockNotHeld`]; a foreign entry is never deleted.
    pub async fn unlock(&self, ctx: &Context) -> LockResult<()> {
        let result = self.try_unlock(ctx).await;
        metrics::record_release(&result);
        result
    }

    async fn try_unlock(&self, ctx: &Context) -> LockResult<()> {
        if !self.state.transition(LockState::Locked, LockState::Unlocked) {
            return Err(LockError::LockNotHeld);
        }

        let deleted = ctx
            .run(self.store.compare_and_delete(&self.key, &self.token))
            .await;

        match deleted {
            Ok(Ok(true)) => {
                debug!(key = %self.key, "Lock released");
                Ok(())
            }
            Ok(Ok(false)) => {
                self.state.transition(LockState::Unlocked, LockState::Expired);
                warn!(key = %self.key, "Lock lease lost before release");
                Err(LockError::LockNotHeld)
            }
            Ok(Err(e)) => {
                self.restore_locked();
                Err(LockError::store("release lock", e))
            }
            Err(ctx_err) => {
                self.restore_locked();
                Err(ctx_err)
            }
        }
    }

    fn restore_locked(&self) {
        if !self.state.transition(LockState::Unlocked, LockState::Locked) {
            debug!(key = %self.key, state = %self.state.load(), "Release rollback skipped");
        }
    }

    /// Extend the remote lease to the full TTL if this handle still owns it
    ///
    /// Never changes local state, so it can run from a background task while
    /// the foreground acquires or releases.
    pub async fn refresh(&self, ctx: &Context) -> LockResult<()> {
        let extended = ctx
            .run(
                self.store
                    .compare_and_extend(&self.key, &self.token, self.ttl),
            )
            .await
            .and_then(|r| r.map_err(|e| LockError::store("refresh lock", e)));

        let result = match extended {
            Ok(true) => {
                debug!(key = %self.key, "Lock lease extended");
                Ok(())
            }
            Ok(false) => Err(LockError::LockNotHeld),
            Err(e) => Err(e),
        };
        metrics::record_refresh(&result);
        result
    }

    /// Whether any owner currently holds the key
    pub async fn is_locked(&self, ctx: &Context) -> LockResult<bool> {
        ctx.run(self.store.exists(&self.key))
            .await?
            .map_err(|e| LockError::store("check lock existence", e))
    }

    /// Whether the key currently carries this handle's token
    ///
    /// An absent key is a normal outcome (`Ok(false)`), not an error.
    pub async fn is_held_by_me(&self, ctx: &Context) -> LockResult<bool> {
        let value = ctx
            .run(self.store.get(&self.key))
            .await?
            .map_err(|e| LockError::store("read lock owner", e))?;
        Ok(value.as_deref() == Some(self.token.as_str()))
    }

    /// Remaining lease on the key, or [`LockError::LockExpired`] if none
    pub async fn ttl_remaining(&self, ctx: &Context) -> LockResult<Duration> {
        ctx.run(self.store.ttl(&self.key))
            .await?
            .map_err(|e| LockError::store("read lock ttl", e))?
            .ok_or(LockError::LockExpired)
    }

    /// Release the lock if this handle still holds it; otherwise a no-op
    pub async fn close(&self, ctx: &Context) -> LockResult<()> {
        if self.is_held_by_me(ctx).await? {
            return self.unlock(ctx).await;
        }
        Ok(())
    }
}

impl fmt::Display for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LockHandle{{key: {}, ttl: {:?}}}", self.key, self.ttl)
    }
}

impl fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .field("state", &self.state.load())
            .finish_non_exhaustive()
    }
}
