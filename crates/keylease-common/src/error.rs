//! Error types for keylease
//!
//! This module defines:
//! - `StoreError`: failures reported by a lock store backend
//! - `LockError`: lock protocol, context and construction errors

/// Errors reported by a lock store backend
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("{op} failed: {message}")]
    Command { op: &'static str, message: String },

    #[error("unexpected store response: {0}")]
    InvalidResponse(String),
}

impl StoreError {
    pub fn command(op: &'static str, message: impl Into<String>) -> Self {
        StoreError::Command {
            op,
            message: message.into(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Lock protocol errors
#[derive(thiserror::Error, Debug)]
pub enum LockError {
    /// The handle already believes it holds the lock
    #[error("lock is already held")]
    AlreadyLocked,

    /// Another owner holds the key; retryable
    #[error("lock not obtained")]
    LockNotObtained,

    /// Release, refresh or cleanup without verified ownership
    #[error("lock not held")]
    LockNotHeld,

    /// The store reports no remaining lease
    #[error("lock has expired")]
    LockExpired,

    #[error("invalid context")]
    InvalidContext,

    #[error("context cancelled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("lock key is required")]
    KeyRequired,

    #[error("lock token is required")]
    TokenRequired,

    #[error("lock ttl must be positive")]
    InvalidTtl,

    #[error("lock store unreachable: {0}")]
    StoreUnreachable(#[source] StoreError),

    #[error("failed to {op}: {source}")]
    Store {
        op: &'static str,
        #[source]
        source: StoreError,
    },
}

impl LockError {
    pub fn store(op: &'static str, source: StoreError) -> Self {
        LockError::Store { op, source }
    }

    /// Only a lost acquisition race is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, LockError::LockNotObtained)
    }

    /// True for the two context termination errors
    pub fn is_context_error(&self) -> bool {
        matches!(self, LockError::Cancelled | LockError::DeadlineExceeded)
    }

    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            LockError::AlreadyLocked => "already_locked",
            LockError::LockNotObtained => "not_obtained",
            LockError::LockNotHeld => "not_held",
            LockError::LockExpired => "expired",
            LockError::InvalidContext => "invalid_context",
            LockError::Cancelled => "cancelled",
            LockError::DeadlineExceeded => "deadline_exceeded",
            LockError::KeyRequired | LockError::TokenRequired | LockError::InvalidTtl => {
                "invalid_argument"
            }
            LockError::StoreUnreachable(_) => "store_unreachable",
            LockError::Store { .. } => "store_error",
        }
    }
}

pub type LockResult<T> = Result<T, LockError>;
