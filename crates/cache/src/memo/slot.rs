//! Per-key coordination unit for the blocking memo cache.
//!
//! A [`Slot`] is installed by exactly one caller (the installer) and starts
//! out `Pending`. The installer settles it once; every other caller that
//! found the slot blocks on a condition variable until that happens.
//!
//! **Thread Safety**
//! - The state lives behind a `parking_lot::Mutex`; there is no poisoning to
//!   recover from.
//! - Waiters use `Condvar` wait loops, so spurious wakeups are harmless and
//!   nobody spins.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::error::MemoError;

/// Result handed to every caller of one epoch.
pub(crate) type Outcome<V, E> = crate::MemoResult<V, E>;

/// Lifecycle of one epoch of a key.
///
/// `Pending` is the only non-terminal state. There is no separate
/// "not started" state: the installer begins computing as soon as the slot is
/// in the map.
pub(crate) enum SlotState<V, E> {
    /// The installer is still computing
    Pending,
    /// The computation produced the canonical value
    Ready(Arc<V>),
    /// The computation returned an error
    Failed(Arc<E>),
    /// The installer went away without settling
    Abandoned,
}

impl<V, E> SlotState<V, E> {
    pub(crate) const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// The outcome waiters observe, `None` while pending.
    pub(crate) fn outcome(&self) -> Option<Outcome<V, E>> {
        match self {
            Self::Pending => None,
            Self::Ready(value) => Some(Ok(Arc::clone(value))),
            Self::Failed(err) => Some(Err(MemoError::Failed(Arc::clone(err)))),
            Self::Abandoned => Some(Err(MemoError::Abandoned)),
        }
    }

    pub(crate) fn ready_value(&self) -> Option<Arc<V>> {
        match self {
            Self::Ready(value) => Some(Arc::clone(value)),
            Self::Pending | Self::Failed(_) | Self::Abandoned => None,
        }
    }

    pub(crate) const fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready(_) => "ready",
            Self::Failed(_) => "failed",
            Self::Abandoned => "abandoned",
        }
    }
}

/// Blocking slot shared between the installer and all waiters of an epoch.
pub(crate) struct Slot<V, E> {
    epoch: u64,
    state: Mutex<SlotState<V, E>>,
    settled: Condvar,
}

impl<V, E> Slot<V, E> {
    pub(crate) fn new(epoch: u64) -> Self {
        Self { epoch, state: Mutex::new(SlotState::Pending), settled: Condvar::new() }
    }

    pub(crate) const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Moves the slot out of `Pending` and wakes every waiter.
    ///
    /// Returns `false` (and changes nothing) if the slot was already settled.
    pub(crate) fn settle(&self, next: SlotState<V, E>) -> bool {
        let mut state = self.state.lock();
        if !state.is_pending() {
            return false;
        }
        *state = next;
        drop(state);
        self.settled.notify_all();
        true
    }

    /// Current outcome without blocking.
    pub(crate) fn peek(&self) -> Option<Outcome<V, E>> {
        self.state.lock().outcome()
    }

    pub(crate) fn ready_value(&self) -> Option<Arc<V>> {
        self.state.lock().ready_value()
    }

    /// Blocks until the slot settles.
    pub(crate) fn wait(&self) -> Outcome<V, E> {
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = state.outcome() {
                return outcome;
            }
            self.settled.wait(&mut state);
        }
    }

    /// Blocks until the slot settles or `deadline` passes.
    ///
    /// Returns `None` on timeout; the slot itself is left as it was.
    pub(crate) fn wait_until(&self, deadline: Instant) -> Option<Outcome<V, E>> {
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = state.outcome() {
                return Some(outcome);
            }
            if self.settled.wait_until(&mut state, deadline).timed_out() {
                return state.outcome();
            }
        }
    }
}

impl<V, E> fmt::Debug for Slot<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("epoch", &self.epoch)
            .field("state", &self.state.lock().label())
            .finish()
    }
}
