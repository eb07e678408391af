//! Keylease core - distributed lease locks over a shared key-value store
//!
//! This crate provides:
//! - [`LockHandle`]: acquire, release, refresh and ownership queries
//! - Retrying and deadline-bound acquisition
//! - [`AutoRefreshTask`]: background lease renewal with one-shot failure reporting
//! - Health snapshots, cleanup and forced recovery
//! - [`LockScope`]: run work under a lock with guaranteed release
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use keylease_core::{Context, LockHandle};
//! use keylease_store::MemoryStore;
//!
//! # async fn demo() -> keylease_core::LockResult<()> {
//! let store = Arc::new(MemoryStore::new());
//! let lock = LockHandle::with_random_token(store, "job:42", Duration::from_secs(2)).await?;
//! let ctx = Context::background().with_timeout(Duration::from_secs(5));
//! lock.lock_with_context(&ctx).await?;
//! // ... critical section ...
//! lock.unlock(&ctx).await?;
//! # Ok(())
//! # }
//! ```

pub mod handle;
pub mod health;
pub mod metrics;
pub mod refresh;
pub mod retry;
pub mod scope;
pub mod state;

pub use handle::LockHandle;
pub use health::LockHealth;
pub use refresh::{AutoRefreshTask, RefreshStopper};
pub use scope::LockScope;
pub use state::LockState;

pub use keylease_common::{Canceller, Context, LockError, LockOptions, LockResult};
