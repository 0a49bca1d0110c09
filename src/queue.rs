//! Multi-producer, single-consumer event queue.
//!
//! A thread-safe unbounded FIFO of boxed events. Any number of producers may
//! push concurrently; the workshop guarantees a single drainer at a time, so
//! consumption is effectively single-consumer. Events pop in the order their
//! pushes linearized, and an event lives in at most one queue at a time
//! because pushing moves the box.

use crate::event::BoxEvent;
use crossbeam_queue::SegQueue;
use std::fmt;

/// An unbounded MPSC queue of events.
#[derive(Default)]
pub(crate) struct EventQueue {
    inner: SegQueue<BoxEvent>,
}

impl EventQueue {
    /// Creates a new empty queue.
    pub(crate) fn new() -> Self {
        Self {
            inner: SegQueue::new(),
        }
    }

    /// Pushes an event, transferring ownership to the queue.
    pub(crate) fn push(&self, event: BoxEvent) {
        self.inner.push(event);
    }

    /// Pops the oldest event, or `None` when the queue is momentarily empty.
    pub(crate) fn pop(&self) -> Option<BoxEvent> {
        self.inner.pop()
    }

    /// Returns the number of queued events.
    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if the queue is empty.
    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("len", &self.len())
            .finish()
    }
}
