// SPDX-License-Identifier: MIT

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::sync::{lock, recover};

/// Wakeup signal bound to one or more job categories.
///
/// The condition itself lives elsewhere (a queue, a running flag); the signal
/// only serialises "check the condition, then sleep" against "change the
/// condition, then notify". Notifiers take the lock before notifying, so a
/// waiter that evaluated its predicate under the lock cannot miss the wakeup.
#[derive(Debug, Default)]
pub struct Signal {
    lock: Mutex<()>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify_all(&self) {
        drop(lock(&self.lock));
        self.cond.notify_all();
    }

    /// Blocks until `ready` returns true. The predicate is re-checked after
    /// every wakeup, spurious ones included.
    pub fn wait_until(&self, mut ready: impl FnMut() -> bool) {
        let mut guard = lock(&self.lock);
        while !ready() {
            guard = recover(self.cond.wait(guard));
        }
    }

    /// Like [`Signal::wait_until`] but gives up after `timeout`.
    /// Returns the final value of the predicate.
    pub fn wait_until_timeout(&self, timeout: Duration, mut ready: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = lock(&self.lock);
        loop {
            if ready() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = recover(self.cond.wait_timeout(guard, deadline - now)).0;
        }
    }
}
