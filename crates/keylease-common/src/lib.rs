//! Keylease Common - Shared types and utilities
//!
//! This crate provides the foundational types used across all keylease components:
//! - Error types for the store and the lock protocol
//! - Cancellation context with optional deadline
//! - Exponential backoff policy
//! - Lock options

pub mod backoff;
pub mod context;
pub mod error;
pub mod options;

// Re-exports for convenience
pub use backoff::ExponentialBackoff;
pub use context::{Canceller, Context};
pub use error::{LockError, LockResult, StoreError, StoreResult};
pub use options::LockOptions;
