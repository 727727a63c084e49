//! Per-unit readiness signal
//!
//! Lets any number of waiters block until the unit's current job reaches a
//! terminal status. A notification wakes only the waiters registered before it;
//! anyone subscribing afterwards waits for the next completion. Callers that
//! need "already done" semantics must check the unit state first.

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Broadcast point fired once per finished job on a unit
#[derive(Debug, Default)]
pub struct ReadinessSignal {
    waiters: Mutex<Vec<oneshot::Sender<()>>>,
}

impl ReadinessSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for the next completion
    ///
    /// The receiver resolves exactly once, when `notify_ready` is next called.
    pub fn wait_for(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().push(tx);
        rx
    }

    /// Wake every registered waiter and reset the list. Returns how many were woken.
    pub fn notify_ready(&self) -> usize {
        let waiters = std::mem::take(&mut *self.waiters.lock());
        let count = waiters.len();
        for tx in waiters {
            // The waiter may have given up; nothing to do then
            let _ = tx.send(());
        }
        count
    }

    /// Number of waiters registered for the next completion
    pub fn pending(&self) -> usize {
        self.waiters.lock().len()
    }
}
