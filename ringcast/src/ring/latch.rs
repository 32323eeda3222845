//! One-shot completion latch used to join ring buffer tasks.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
pub(crate) struct Latch {
    released: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn release(&self) {
        let mut released = self.released.lock();
        *released = true;
        self.cond.notify_all();
    }

    pub(crate) fn is_released(&self) -> bool {
        *self.released.lock()
    }

    pub(crate) fn wait(&self) {
        let mut released = self.released.lock();
        while !*released {
            self.cond.wait(&mut released);
        }
    }

    /// Returns whether the latch was released before the timeout.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut released = self.released.lock();
        while !*released {
            if self.cond.wait_until(&mut released, deadline).timed_out() {
                return *released;
            }
        }
        true
    }
}
