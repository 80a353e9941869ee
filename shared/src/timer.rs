//! Ring timeout scheduling
//!
//! The router never talks to a clock directly. It asks a [`Timer`] to deliver
//! an [`Expiry`] after a delay and cancels the handle when the operator leaves
//! the ringing state. Whoever drives the router feeds delivered expiries back
//! into [`CallRouter::timeout_fired`](crate::CallRouter::timeout_fired).

use std::collections::BTreeMap;
use std::time::Duration;

use crate::{CallId, OperatorId};

/// Payload delivered when a ring timeout elapses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expiry {
    pub call_id: CallId,
    pub operator_id: OperatorId,
    /// Ring generation of the assignment that scheduled this timeout
    pub ring: u64,
}

/// One-shot scheduler with cancellable handles
pub trait Timer {
    type Handle;

    /// Deliver `expiry` once, after `delay`
    fn schedule(&mut self, delay: Duration, expiry: Expiry) -> Self::Handle;

    /// Cancel a scheduled expiry. Cancelling one that already fired is a no-op.
    fn cancel(&mut self, handle: Self::Handle);
}

/// Handle issued by [`ManualTimer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ManualHandle(u64);

/// Virtual-time timer
///
/// Nothing fires until [`ManualTimer::advance`] moves the clock forward.
#[derive(Debug, Default)]
pub struct ManualTimer {
    now: Duration,
    next_handle: u64,
    pending: BTreeMap<ManualHandle, (Duration, Expiry)>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Number of scheduled expiries that have neither fired nor been cancelled
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Move the clock forward and return every expiry that became due,
    /// ordered by deadline, then by scheduling order.
    pub fn advance(&mut self, by: Duration) -> Vec<Expiry> {
        self.now += by;

        let mut due: Vec<(Duration, ManualHandle)> = self
            .pending
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= self.now)
            .map(|(handle, (deadline, _))| (*deadline, *handle))
            .collect();
        due.sort();

        due.into_iter()
            .filter_map(|(_, handle)| self.pending.remove(&handle))
            .map(|(_, expiry)| expiry)
            .collect()
    }
}

impl Timer for ManualTimer {
    type Handle = ManualHandle;

    fn schedule(&mut self, delay: Duration, expiry: Expiry) -> ManualHandle {
        self.next_handle += 1;
        let handle = ManualHandle(self.next_handle);
        self.pending.insert(handle, (self.now + delay, expiry));
        handle
    }

    fn cancel(&mut self, handle: ManualHandle) {
        self.pending.remove(&handle);
    }
}
