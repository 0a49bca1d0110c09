//! Strands: a worker viewed as a single-threaded serializer.
//!
//! Binding an actor to a strand routes all of its events through one
//! worker's queue, which yields in-order, never-concurrent execution for
//! that actor without any locking in the actor itself.

use crate::context::ThreadContext;
use crate::coro::{CoroContext, StackSize};
use crate::engine::Engine;
use crate::event::BoxEvent;

/// A handle to one worker index of an engine.
#[derive(Debug, Clone)]
pub struct Strand {
    engine: Engine,
    index: usize,
}

impl Strand {
    /// Binds a strand to `worker_index` of `engine`.
    ///
    /// # Panics
    ///
    /// Panics if `worker_index` is not less than the engine's worker count.
    #[must_use]
    pub fn new(engine: &Engine, worker_index: usize) -> Self {
        assert!(
            worker_index < engine.worker_num(),
            "strand index {} out of range for {} workers",
            worker_index,
            engine.worker_num()
        );
        Self {
            engine: engine.clone(),
            index: worker_index,
        }
    }

    /// The bound worker index.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The engine this strand belongs to.
    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Submits a handler to run on this strand.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce(&mut ThreadContext) + Send + 'static,
    {
        self.engine.post_to(self.index, Box::new(f));
    }

    /// Spawns a coroutine on this strand with the default stack size.
    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce(&mut CoroContext) + Send + 'static,
    {
        self.engine.spawn_to(self.index, Box::new(f), None);
    }

    /// Spawns a coroutine on this strand with an explicit stack size.
    pub fn spawn_with_stack<F>(&self, f: F, stack: StackSize)
    where
        F: FnOnce(&mut CoroContext) + Send + 'static,
    {
        self.engine.spawn_to(self.index, Box::new(f), Some(stack));
    }

    /// Submits a user-constructed event to this strand, transferring
    /// ownership.
    pub fn submit(&self, event: BoxEvent) {
        self.engine.submit_to(self.index, event);
    }
}
