//! Events: the unit of work the engine dispatches.
//!
//! An event is a boxed object with a polymorphic `handle`. Ownership is
//! explicit in the signature: `handle` consumes the box and either returns
//! it (`Some`, the auto-release path where the dispatcher returns the event
//! to its pool) or keeps it (`None`, meaning ownership was transferred
//! elsewhere during handling, e.g. a spawned coroutine retaining its event
//! across suspensions).
//!
//! Pooled events additionally implement [`Pooled`] so `make_event` can bind
//! them to the calling thread's pool; their `release` pushes the concrete
//! box back onto the pool free-list instead of dropping it.

use crate::context::ThreadContext;
use crate::fault::FaultTrace;
use crate::pool::PoolHandle;
use std::sync::Arc;

/// An owned, type-erased event.
pub type BoxEvent = Box<dyn Event>;

/// A discrete unit of work.
pub trait Event: Send + 'static {
    /// Processes the event on the dispatching thread.
    ///
    /// Return `Some(self)` to have the dispatcher release the event (the
    /// auto-release path), or `None` when ownership has been transferred
    /// elsewhere during handling.
    fn handle(self: Box<Self>, cx: &mut ThreadContext) -> Option<BoxEvent>;

    /// Destroys the event: pooled events return to their originating pool,
    /// everything else is dropped.
    fn release(self: Box<Self>) {}
}

/// An event recyclable through a typed pool.
pub trait Pooled: Event + Default + Sized {
    /// Binds the pool the event was taken from; called by the pool on `get`.
    fn bind_pool(&mut self, pool: PoolHandle<Self>);

    /// Clears per-dispatch state before the event re-enters the free-list.
    fn reset(&mut self) {}
}

/// Boxed one-shot handler run by a [`PostEvent`].
pub(crate) type PostFn = Box<dyn FnOnce(&mut ThreadContext) + Send + 'static>;

/// Pooled event wrapping a one-shot closure submitted via `post`.
#[derive(Default)]
pub struct PostEvent {
    handler: Option<PostFn>,
    pool: Option<PoolHandle<PostEvent>>,
}

impl PostEvent {
    pub(crate) fn set_handler(&mut self, handler: PostFn) {
        self.handler = Some(handler);
    }
}

impl Event for PostEvent {
    fn handle(mut self: Box<Self>, cx: &mut ThreadContext) -> Option<BoxEvent> {
        if let Some(handler) = self.handler.take() {
            handler(cx);
        }
        Some(self)
    }

    fn release(mut self: Box<Self>) {
        if let Some(pool) = self.pool.take() {
            pool.put(self);
        }
    }
}

impl Pooled for PostEvent {
    fn bind_pool(&mut self, pool: PoolHandle<Self>) {
        self.pool = Some(pool);
    }

    fn reset(&mut self) {
        self.handler = None;
    }
}

/// Shared handler fanned out to every thread's start or exit queue.
pub(crate) type LifecycleFn = Arc<dyn Fn(&mut ThreadContext) + Send + Sync + 'static>;

/// Shared handler fanned out to every thread's fault queue.
pub(crate) type FaultFn = Arc<dyn Fn(&mut ThreadContext, &FaultTrace) + Send + Sync + 'static>;

/// One thread's copy of a `tstart` registration.
pub(crate) struct TstartEvent {
    handler: LifecycleFn,
}

impl TstartEvent {
    pub(crate) fn new(handler: LifecycleFn) -> Self {
        Self { handler }
    }

    pub(crate) fn run(&self, cx: &mut ThreadContext) {
        (self.handler)(cx);
    }
}

/// One thread's copy of a `texit` registration.
pub(crate) struct TexitEvent {
    handler: LifecycleFn,
}

impl TexitEvent {
    pub(crate) fn new(handler: LifecycleFn) -> Self {
        Self { handler }
    }

    pub(crate) fn run(&self, cx: &mut ThreadContext) {
        (self.handler)(cx);
    }
}

/// One thread's copy of a `tsegv` registration.
pub(crate) struct TsegvEvent {
    handler: FaultFn,
}

impl TsegvEvent {
    pub(crate) fn new(handler: FaultFn) -> Self {
        Self { handler }
    }

    pub(crate) fn run(&self, cx: &mut ThreadContext, trace: &FaultTrace) {
        (self.handler)(cx, trace);
    }
}
