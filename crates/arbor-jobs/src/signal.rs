//! One-shot completion signalling between a job and its observers.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Set-once broadcast signal carrying a job's success flag.
///
/// Cloning shares the underlying slot: any number of observers may block in
/// [`wait`](CompletionSignal::wait) while exactly one producer resolves it.
/// The slot resolves at most once; later `set` calls are ignored.
#[derive(Clone)]
pub struct CompletionSignal {
    inner: Arc<SignalInner>,
}

struct SignalInner {
    slot: Mutex<Option<bool>>,
    cond: Condvar,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                slot: Mutex::new(None),
                cond: Condvar::new(),
            }),
        }
    }

    /// Resolve the signal. Only the first call has any effect.
    pub fn set(&self, success: bool) {
        let mut slot = self.inner.slot.lock();
        if slot.is_some() {
            log::warn!("completion signal resolved more than once; keeping first value");
            return;
        }
        *slot = Some(success);
        self.inner.cond.notify_all();
    }

    /// Block until the signal resolves and return the success flag.
    pub fn wait(&self) -> bool {
        let mut slot = self.inner.slot.lock();
        loop {
            if let Some(value) = *slot {
                return value;
            }
            self.inner.cond.wait(&mut slot);
        }
    }

    /// Block until the signal resolves or `timeout` elapses.
    ///
    /// Returns `None` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<bool> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.inner.slot.lock();
        loop {
            if let Some(value) = *slot {
                return Some(value);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            self.inner.cond.wait_for(&mut slot, deadline - now);
        }
    }

    /// Non-blocking read of the resolved value, if any.
    pub fn try_get(&self) -> Option<bool> {
        *self.inner.slot.lock()
    }

    pub fn is_resolved(&self) -> bool {
        self.try_get().is_some()
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}
