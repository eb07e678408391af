// Retrying acquisition
// Only a lost race is retried; every other failure returns immediately

use std::time::Duration;

use tracing::debug;

use keylease_common::{Context, ExponentialBackoff, LockError, LockResult};

use crate::handle::LockHandle;

/// Upper bound on the per-attempt slot used by `lock_with_context`
const MAX_CONTEXT_SLOT: Duration = Duration::from_secs(1);

/// Number of slots a context deadline is divided into
const CONTEXT_SLOTS: u32 = 10;

impl LockHandle {
    /// Acquire with up to `max_retries` extra attempts and exponential backoff
    ///
    /// `ctx` must be able to end (cancellable or with a deadline); a plain
    /// background context yields [`LockError::InvalidContext`].
    pub async fn lock_with_retry(
        &self,
        ctx: &Context,
        max_retries: u32,
        initial_delay: Duration,
    ) -> LockResult<()> {
        if ctx.is_background() {
            return Err(LockError::InvalidContext);
        }

        let mut backoff = ExponentialBackoff::new(initial_delay);
        for attempt in 0..=max_retries {
            match self.lock(ctx).await {
                Ok(()) => return Ok(()),
                Err(LockError::LockNotObtained) if attempt < max_retries => {
                    let delay = backoff.next_backoff();
                    debug!(
                        key = %self.key(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Lock busy, backing off"
                    );
                    ctx.sleep(delay).await?;
                }
                Err(e) => return Err(e),
            }
        }
        Err(LockError::LockNotObtained)
    }

    /// Keep trying until the context deadline
    ///
    /// Without a deadline this is a single [`lock`](Self::lock) attempt.
    pub async fn lock_with_context(&self, ctx: &Context) -> LockResult<()> {
        let Some(remaining) = ctx.remaining() else {
            return self.lock(ctx).await;
        };
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let slot = (remaining / CONTEXT_SLOTS).min(MAX_CONTEXT_SLOT);
        if slot.is_zero() {
            return self.lock(ctx).await;
        }
        let retries = (remaining.as_nanos() / slot.as_nanos()).min(u32::MAX as u128) as u32;
        self.lock_with_retry(ctx, retries, slot).await
    }

    /// [`lock_with_retry`](Self::lock_with_retry) driven by the handle's options
    pub async fn lock_with_options(&self, ctx: &Context) -> LockResult<()> {
        let options = self.options();
        self.lock_with_retry(ctx, options.retry_count, options.retry_delay())
            .await
    }
}
