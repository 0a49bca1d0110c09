//! Wakeup counter: the producer-to-thread wake edge.
//!
//! Every successful push to a worker increments the owning thread's counter
//! exactly once before the pusher returns. The increment takes the thread's
//! mutex, so a thread about to block on the condvar is guaranteed to observe
//! it; a thread that is already running simply sees the counter grow on its
//! next `reset`. The idle loop's spin and poll phases use the non-blocking
//! `reset`; the blocking phase uses `synchronized_reset`, which waits on the
//! condvar until the counter becomes positive.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Condvar, Mutex};

/// Monotonic wakeup counter with a synchronized increment.
#[derive(Debug, Default)]
pub(crate) struct WakeCounter {
    count: AtomicI64,
    lock: Mutex<()>,
    condvar: Condvar,
}

impl WakeCounter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Increments the counter under the mutex and signals the condvar.
    pub(crate) fn incr(&self) {
        let _guard = self.lock.lock().expect("wake mutex poisoned");
        self.count.fetch_add(1, Ordering::Release);
        self.condvar.notify_one();
    }

    /// Atomically swaps the counter to zero, returning the prior value.
    pub(crate) fn reset(&self) -> i64 {
        self.count.swap(0, Ordering::AcqRel)
    }

    /// Blocks until the counter is positive, then swaps it to zero and
    /// returns the prior value.
    pub(crate) fn synchronized_reset(&self) -> i64 {
        let mut guard = self.lock.lock().expect("wake mutex poisoned");
        loop {
            let value = self.count.swap(0, Ordering::AcqRel);
            if value > 0 {
                return value;
            }
            guard = self.condvar.wait(guard).expect("wake condvar poisoned");
        }
    }
}
