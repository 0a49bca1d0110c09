//! Per-thread dispatch context loaned to event handlers.

use crate::coro;
use crate::engine::Engine;
use crate::logger::Logger;
use std::sync::Arc;

/// The context an engine thread passes to every handler it runs.
///
/// Borrowed mutably for the duration of one `handle` call; it never escapes
/// the dispatching thread.
pub struct ThreadContext {
    engine: Engine,
    index: usize,
    host: Arc<coro::Context>,
    worker: Option<usize>,
}

impl ThreadContext {
    pub(crate) fn new(engine: Engine, index: usize, host: Arc<coro::Context>) -> Self {
        Self {
            engine,
            index,
            host,
            worker: None,
        }
    }

    /// The engine this thread belongs to.
    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// This thread's index within the engine.
    #[must_use]
    pub fn thread_index(&self) -> usize {
        self.index
    }

    /// Index of the worker currently being drained, if any.
    #[must_use]
    pub fn worker_index(&self) -> Option<usize> {
        self.worker
    }

    /// The engine's logger.
    #[must_use]
    pub fn logger(&self) -> &Arc<dyn Logger> {
        self.engine.logger()
    }

    /// The switch point a coroutine swaps back into when it suspends.
    pub(crate) fn host_context(&self) -> &Arc<coro::Context> {
        &self.host
    }

    pub(crate) fn set_worker(&mut self, index: usize) {
        self.worker = Some(index);
    }

    pub(crate) fn clear_worker(&mut self) {
        self.worker = None;
    }
}

impl std::fmt::Debug for ThreadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadContext")
            .field("engine", &self.engine.id())
            .field("thread_index", &self.index)
            .field("worker", &self.worker)
            .finish()
    }
}
