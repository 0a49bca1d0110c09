//! Workers: one event queue plus its drain machinery.
//!
//! A worker is the unit a strand binds to. Producers push into its queue
//! from any thread; the thread currently holding the worker's workshop slot
//! drains it in FIFO order until momentarily empty. There is no yield
//! quantum inside a drain, so a strand running many events in a row keeps
//! the worker until its queue empties.

use crate::context::ThreadContext;
use crate::event::BoxEvent;
use crate::queue::EventQueue;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Whether a drain runs on the worker's home thread or as spillover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkLevel {
    /// The worker is a prior of the draining thread (`index mod T == t`).
    Prior,
    /// The worker belongs to another thread; this drain is spillover.
    Minor,
}

/// An event queue with drain accounting.
#[derive(Debug)]
pub(crate) struct Worker {
    index: usize,
    queue: EventQueue,
    /// Events handled by the home thread (stats).
    prior_works: AtomicUsize,
    /// Events handled by other threads (stats).
    minor_works: AtomicUsize,
    /// Minor-level works not yet claimed by the home thread's wake
    /// accounting. The home thread's counter was incremented for these
    /// events, so it subtracts them from its expected work.
    unclaimed_minor_works: AtomicUsize,
}

impl Worker {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            queue: EventQueue::new(),
            prior_works: AtomicUsize::new(0),
            minor_works: AtomicUsize::new(0),
            unclaimed_minor_works: AtomicUsize::new(0),
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    /// Pushes an event, transferring ownership to this worker.
    pub(crate) fn push(&self, event: BoxEvent) {
        self.queue.push(event);
    }

    pub(crate) fn queue_is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drains the queue until momentarily empty.
    ///
    /// Must only be called while holding this worker's workshop slot. Each
    /// event's `handle` runs to completion; `Some` returns are released to
    /// their pool. Returns the number of events handled.
    pub(crate) fn drain(&self, cx: &mut ThreadContext, level: WorkLevel) -> usize {
        let mut works = 0;
        while let Some(event) = self.queue.pop() {
            works += 1;
            if let Some(done) = event.handle(cx) {
                done.release();
            }
        }
        match level {
            WorkLevel::Prior => {
                self.prior_works.fetch_add(works, Ordering::Relaxed);
            }
            WorkLevel::Minor => {
                self.minor_works.fetch_add(works, Ordering::Relaxed);
                self.unclaimed_minor_works.fetch_add(works, Ordering::Relaxed);
            }
        }
        works
    }

    /// Takes the minor-level work count accumulated since the last call.
    pub(crate) fn take_unclaimed_minor_works(&self) -> usize {
        self.unclaimed_minor_works.swap(0, Ordering::Relaxed)
    }

    /// Cumulative (prior, minor) dispatch counts.
    pub(crate) fn work_counts(&self) -> (usize, usize) {
        (
            self.prior_works.load(Ordering::Relaxed),
            self.minor_works.load(Ordering::Relaxed),
        )
    }

    /// Releases every residual event without handling it. Engine teardown
    /// path for submissions that arrived after `stop`.
    pub(crate) fn drain_residual(&self) -> usize {
        let mut released = 0;
        while let Some(event) = self.queue.pop() {
            event.release();
            released += 1;
        }
        released
    }
}
