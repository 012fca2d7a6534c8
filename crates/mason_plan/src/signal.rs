//! One-shot completion latch.
//!
//! Observable from worker threads (blocking) and from the async control
//! flow (awaiting) alike.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Latch that flips from unset to set exactly once
#[derive(Debug, Default)]
pub struct DoneSignal {
    set: Mutex<bool>,
    cond: Condvar,
    notify: Notify,
}

impl DoneSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the latch, returns `false` if it was already set
    pub fn set(&self) -> bool {
        {
            let mut set = self.set.lock();
            if *set {
                return false;
            }
            *set = true;
        }
        self.cond.notify_all();
        self.notify.notify_waiters();
        true
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        *self.set.lock()
    }

    /// Block the current thread until set or until `timeout` elapses
    ///
    /// Returns whether the latch is set.
    pub fn wait_blocking(&self, timeout: Option<Duration>) -> bool {
        let mut set = self.set.lock();
        match timeout {
            Some(timeout) => {
                if !*set {
                    let _ = self.cond.wait_while_for(&mut set, |set| !*set, timeout);
                }
            }
            None => self.cond.wait_while(&mut set, |set| !*set),
        }
        *set
    }

    /// Wait asynchronously until set
    pub async fn wait(&self) {
        loop {
            let mut notified = std::pin::pin!(self.notify.notified());
            notified.as_mut().enable();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}
