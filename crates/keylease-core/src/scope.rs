//! Scoped execution under a lock
//!
//! [`LockScope::run`] acquires, runs the caller's work, and always attempts a
//! release afterwards, even when the work fails or panics. Release problems
//! are logged and counted but never replace the work's own outcome.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::warn;

use keylease_common::{Context, LockError};

use crate::handle::LockHandle;
use crate::metrics;

pub struct LockScope {
    handle: Arc<LockHandle>,
    ctx: Context,
    wait: Option<Duration>,
}

impl LockScope {
    pub fn new(handle: Arc<LockHandle>, ctx: Context) -> Self {
        Self {
            handle,
            ctx,
            wait: None,
        }
    }

    /// Keep retrying acquisition for up to `wait` instead of a single attempt
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }

    /// Run `work` while holding the lock
    ///
    /// An acquisition failure is converted into the caller's error type and
    /// `work` is not started. A panic inside `work` is re-raised after the
    /// release attempt.
    pub async fn run<F, Fut, T, E>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        match self.wait {
            Some(wait) => {
                self.handle
                    .lock_with_context(&self.ctx.with_timeout(wait))
                    .await?
            }
            None => self.handle.lock(&self.ctx).await?,
        }

        // Calling `work` inside the guarded future also covers panics raised
        // before it hands back its future
        let outcome = AssertUnwindSafe(async move { work().await })
            .catch_unwind()
            .await;

        self.release().await;

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn release(&self) {
        // A finished context would fail the release before it reaches the store
        let release_ctx = if self.ctx.is_done() {
            Context::background().with_timeout(self.handle.ttl())
        } else {
            self.ctx.clone()
        };

        if let Err(e) = self.handle.unlock(&release_ctx).await {
            metrics::record_scope_release_failure();
            warn!(key = %self.handle.key(), error = %e, "Failed to release lock after scoped work");
        }
    }
}
