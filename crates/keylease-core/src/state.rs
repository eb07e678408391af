// Local lock state
// Cached belief about ownership; the remote key stays authoritative

use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

/// What a handle believes about its lease
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    /// Not held
    Unlocked,
    /// Held, or being acquired
    Locked,
    /// A release found the remote key no longer carrying our token
    Expired,
}

// Atomic state representation
const STATE_UNLOCKED: u8 = 0;
const STATE_LOCKED: u8 = 1;
const STATE_EXPIRED: u8 = 2;

impl LockState {
    fn from_u8(v: u8) -> Self {
        match v {
            STATE_LOCKED => LockState::Locked,
            STATE_EXPIRED => LockState::Expired,
            _ => LockState::Unlocked,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            LockState::Unlocked => STATE_UNLOCKED,
            LockState::Locked => STATE_LOCKED,
            LockState::Expired => STATE_EXPIRED,
        }
    }
}

impl std::fmt::Display for LockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LockState::Unlocked => "unlocked",
            LockState::Locked => "locked",
            LockState::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

/// Tri-state cell mutated only through compare-and-swap
#[derive(Debug)]
pub(crate) struct AtomicLockState(AtomicU8);

impl AtomicLockState {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(STATE_UNLOCKED))
    }

    pub(crate) fn load(&self) -> LockState {
        LockState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move `from -> to` atomically; false if the current state is not `from`
    pub(crate) fn transition(&self, from: LockState, to: LockState) -> bool {
        self.0
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Unconditional atomic reset, returning the previous state
    pub(crate) fn reset(&self) -> LockState {
        LockState::from_u8(self.0.swap(STATE_UNLOCKED, Ordering::AcqRel))
    }
}
