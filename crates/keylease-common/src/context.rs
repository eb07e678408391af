//! Cancellation context for lock operations
//!
//! A [`Context`] bundles zero or more cancellation sources and an optional
//! deadline. Every blocking lock operation takes one and races its store round
//! trip against it. Child contexts inherit the parent's cancellation sources
//! and keep the earlier of the two deadlines.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::select_all;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{LockError, LockResult};

/// Cancellation token with optional deadline
#[derive(Clone, Debug, Default)]
pub struct Context {
    cancel: Vec<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

/// Cancels every context derived from the one it was created with
#[derive(Clone, Debug)]
pub struct Canceller {
    sender: Arc<watch::Sender<bool>>,
}

impl Canceller {
    /// Trigger cancellation. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a child context plus the handle that cancels it
    pub fn with_cancel(&self) -> (Context, Canceller) {
        let (sender, receiver) = watch::channel(false);
        let mut child = self.clone();
        child.cancel.push(receiver);
        (
            child,
            Canceller {
                sender: Arc::new(sender),
            },
        )
    }

    /// Derive a child context that expires `timeout` from now
    pub fn with_timeout(&self, timeout: Duration) -> Context {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a child context with the given deadline (the earlier one wins)
    pub fn with_deadline(&self, deadline: Instant) -> Context {
        let mut child = self.clone();
        child.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        child
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline, saturating at zero
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// True when nothing can ever end this context
    pub fn is_background(&self) -> bool {
        self.cancel.is_empty() && self.deadline.is_none()
    }

    /// The termination error, if the context has already ended
    pub fn err(&self) -> Option<LockError> {
        if self.cancel.iter().any(|rx| *rx.borrow()) {
            return Some(LockError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(LockError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolve once the context ends, yielding the termination error
    pub async fn done(&self) -> LockError {
        if let Some(err) = self.err() {
            return err;
        }

        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = self.cancelled() => LockError::Cancelled,
            _ = expired => LockError::DeadlineExceeded,
        }
    }

    async fn cancelled(&self) {
        if self.cancel.is_empty() {
            return std::future::pending::<()>().await;
        }

        let waits = self.cancel.iter().map(|rx| {
            let mut rx = rx.clone();
            Box::pin(async move {
                // A dropped canceller can no longer cancel anything
                let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
                if closed {
                    std::future::pending::<()>().await;
                }
            })
        });
        select_all(waits).await;
    }

    /// Run `future` unless the context ends first
    pub async fn run<F>(&self, future: F) -> LockResult<F::Output>
    where
        F: Future,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            output = future => Ok(output),
            err = self.done() => Err(err),
        }
    }

    /// Sleep for `duration` unless the context ends first
    pub async fn sleep(&self, duration: Duration) -> LockResult<()> {
        self.run(tokio::time::sleep(duration)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_never_done() {
        let ctx = Context::background();
        assert!(ctx.is_background());
        assert!(ctx.err().is_none());
        assert!(ctx.remaining().is_none());
        assert_eq!(ctx.run(async { 7 }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_children() {
        let (parent, canceller) = Context::background().with_cancel();
        let child = parent.with_timeout(Duration::from_secs(60));

        assert!(!child.is_done());
        canceller.cancel();
        canceller.cancel();

        assert!(canceller.is_cancelled());
        assert!(matches!(child.err(), Some(LockError::Cancelled)));
        assert!(matches!(parent.done().await, LockError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts_sleep() {
        let ctx = Context::background().with_timeout(Duration::from_millis(100));
        let started = Instant::now();

        let result = ctx.sleep(Duration::from_secs(10)).await;

        assert!(matches!(result, Err(LockError::DeadlineExceeded)));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_deadline_wins() {
        let outer = Context::background().with_timeout(Duration::from_secs(1));
        let inner = outer.with_timeout(Duration::from_secs(5));
        assert_eq!(inner.deadline(), outer.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_run() {
        let (ctx, canceller) = Context::background().with_cancel();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = ctx.run(std::future::pending::<()>()).await;
        assert!(matches!(result, Err(LockError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_canceller_does_not_cancel() {
        let (ctx, canceller) = Context::background().with_cancel();
        drop(canceller);

        let ctx = ctx.with_timeout(Duration::from_millis(50));
        assert!(matches!(ctx.done().await, LockError::DeadlineExceeded));
    }
}
