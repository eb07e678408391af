//! Background lease renewal
//!
//! [`AutoRefreshTask`] extends the lease on a fixed interval until it is
//! stopped, its context ends, or a refresh fails. The terminal error (if any)
//! is delivered exactly once through a oneshot channel, after which the
//! receiver observes closure.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use keylease_common::{Context, LockError};

use crate::handle::LockHandle;

/// Stops a running auto-refresh task
///
/// Cloneable; `stop` is idempotent and safe after the task has finished.
/// Dropping every stopper leaves the task running.
#[derive(Clone, Debug)]
pub struct RefreshStopper {
    sender: Arc<watch::Sender<bool>>,
}

impl RefreshStopper {
    pub fn stop(&self) {
        self.sender.send_replace(true);
    }
}

pub struct AutoRefreshTask;

impl AutoRefreshTask {
    /// Spawn the renewal loop for `handle`
    ///
    /// A zero `interval` falls back to a third of the handle's TTL.
    pub fn spawn(
        handle: Arc<LockHandle>,
        ctx: &Context,
        interval: Duration,
    ) -> (oneshot::Receiver<LockError>, RefreshStopper) {
        let interval = if interval.is_zero() {
            (handle.ttl() / 3).max(Duration::from_millis(1))
        } else {
            interval
        };

        let (result_tx, result_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let ctx = ctx.clone();

        tokio::spawn(async move {
            if let Some(err) = refresh_loop(&handle, &ctx, interval, stop_rx).await {
                // Receiver may already be gone
                let _ = result_tx.send(err);
            }
        });

        (
            result_rx,
            RefreshStopper {
                sender: Arc::new(stop_tx),
            },
        )
    }
}

async fn refresh_loop(
    handle: &LockHandle,
    ctx: &Context,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> Option<LockError> {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(key = %handle.key(), interval_ms = interval.as_millis() as u64, "Auto-refresh started");

    loop {
        tokio::select! {
            biased;
            _ = stopped(&mut stop) => {
                debug!(key = %handle.key(), "Auto-refresh stopped");
                return None;
            }
            err = ctx.done() => {
                debug!(key = %handle.key(), error = %err, "Auto-refresh context ended");
                return Some(err);
            }
            _ = ticker.tick() => {
                if let Err(e) = handle.refresh(ctx).await {
                    if e.is_context_error() {
                        debug!(key = %handle.key(), error = %e, "Auto-refresh interrupted by context");
                    } else {
                        warn!(key = %handle.key(), error = %e, "Auto-refresh failed, lease may be lost");
                    }
                    return Some(e);
                }
            }
        }
    }
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    // All stoppers dropped without stopping: keep running
    if stop.wait_for(|stopped| *stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
}

impl LockHandle {
    /// Method form of [`AutoRefreshTask::spawn`]
    pub fn auto_refresh(
        self: &Arc<Self>,
        ctx: &Context,
        interval: Duration,
    ) -> (oneshot::Receiver<LockError>, RefreshStopper) {
        AutoRefreshTask::spawn(self.clone(), ctx, interval)
    }
}

#[cfg(test)]
mod tests {
    use keylease_store::MemoryStore;

    use super::*;

    async fn locked(store: &Arc<MemoryStore>, ttl: Duration) -> Arc<LockHandle> {
        let handle = LockHandle::new(store.clone(), "res", "owner", ttl).await.unwrap();
        handle.lock(&Context::background()).await.unwrap();
        Arc::new(handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_keeps_lease_alive() {
        let store = Arc::new(MemoryStore::new());
        let handle = locked(&store, Duration::from_millis(300)).await;
        let ctx = Context::background();

        let (mut errors, stopper) = handle.auto_refresh(&ctx, Duration::from_millis(100));
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(handle.is_held_by_me(&ctx).await.unwrap());
        assert!(errors.try_recv().is_err());

        stopper.stop();
        stopper.stop();
        // Manual stop delivers nothing and closes the channel
        assert!(errors.await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_outage_delivers_single_error() {
        let store = Arc::new(MemoryStore::new());
        let handle = locked(&store, Duration::from_secs(3)).await;

        let (errors, stopper) = handle.auto_refresh(&Context::background(), Duration::ZERO);
        store.set_unavailable(true);

        let err = errors.await.unwrap();
        assert!(matches!(err, LockError::Store { op: "refresh lock", .. }));
        // Stopping a finished task is harmless
        stopper.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_end_is_reported() {
        let store = Arc::new(MemoryStore::new());
        let handle = locked(&store, Duration::from_secs(3)).await;
        let (ctx, canceller) = Context::background().with_cancel();

        let (errors, _stopper) = handle.auto_refresh(&ctx, Duration::from_millis(500));
        tokio::time::sleep(Duration::from_millis(1200)).await;
        canceller.cancel();

        assert!(matches!(errors.await.unwrap(), LockError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_stopper_keeps_task_running() {
        let store = Arc::new(MemoryStore::new());
        let handle = locked(&store, Duration::from_millis(300)).await;
        let ctx = Context::background();

        let (mut errors, stopper) = handle.auto_refresh(&ctx, Duration::from_millis(100));
        drop(stopper);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(handle.is_held_by_me(&ctx).await.unwrap());
        assert!(matches!(
            errors.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_lease_reported_as_not_held() {
        let store = Arc::new(MemoryStore::new());
        let handle = locked(&store, Duration::from_secs(3)).await;

        let (errors, _stopper) = handle.auto_refresh(&Context::background(), Duration::from_secs(1));
        handle.force_unlock(&Context::background()).await.unwrap();

        assert!(matches!(errors.await.unwrap(), LockError::LockNotHeld));
    }
}
