//! Typed event pools with thread-local ownership.
//!
//! Dispatch events are never allocated from the general heap per submission
//! on hot paths. Each producer thread owns one pool per (engine, concrete
//! event type), held in a thread-local registry indexed by engine id and
//! bounded by [`MAX_ENGINES`]. `get` is only ever called by the owning
//! thread; `put` pushes onto a lock-free free-list and is safe from any
//! thread, so an event raised on thread A may be recycled by whichever
//! thread finished handling it.
//!
//! Outstanding-allocation counters are kept per pool and per engine to make
//! leak accounting observable (see `Engine::outstanding_events`).

use crate::event::Pooled;
use crossbeam_queue::SegQueue;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Maximum number of engines that may exist in one process.
///
/// Bounds the thread-local pool registry; constructing more engines is a
/// fatal assertion.
pub const MAX_ENGINES: usize = 32;

/// Shared state of one typed pool.
struct PoolShared<E: Pooled> {
    /// Recycled events ready for reuse.
    free: SegQueue<Box<E>>,
    /// Events handed out and not yet recycled.
    outstanding: AtomicUsize,
    /// Engine-wide live-allocation counter this pool contributes to.
    engine_outstanding: Arc<AtomicUsize>,
}

/// Handle to a typed event pool.
///
/// Cloned into every event the pool hands out so the event can find its way
/// home from any thread.
pub struct PoolHandle<E: Pooled> {
    shared: Arc<PoolShared<E>>,
}

impl<E: Pooled> Clone for PoolHandle<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E: Pooled> fmt::Debug for PoolHandle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolHandle")
            .field("outstanding", &self.outstanding())
            .field("free", &self.shared.free.len())
            .finish()
    }
}

impl<E: Pooled> PoolHandle<E> {
    fn new(engine_outstanding: Arc<AtomicUsize>) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                free: SegQueue::new(),
                outstanding: AtomicUsize::new(0),
                engine_outstanding,
            }),
        }
    }

    /// Takes a recycled event or allocates a fresh one, binding this pool
    /// to it. Called only by the registry on the owning thread.
    pub(crate) fn get(&self) -> Box<E> {
        let mut event = self
            .shared
            .free
            .pop()
            .unwrap_or_else(|| Box::new(E::default()));
        event.bind_pool(self.clone());
        self.shared.outstanding.fetch_add(1, Ordering::Relaxed);
        self.shared
            .engine_outstanding
            .fetch_add(1, Ordering::Relaxed);
        event
    }

    /// Returns an event to the pool. Safe from any thread.
    pub fn put(&self, mut event: Box<E>) {
        event.reset();
        self.shared.outstanding.fetch_sub(1, Ordering::Relaxed);
        self.shared
            .engine_outstanding
            .fetch_sub(1, Ordering::Relaxed);
        self.shared.free.push(event);
    }

    /// Number of events handed out and not yet recycled.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::Relaxed)
    }
}

/// Per-thread pools for one engine, keyed by concrete event type.
type EnginePoolSet = HashMap<TypeId, Box<dyn Any>>;

struct PoolRegistry {
    engines: [Option<EnginePoolSet>; MAX_ENGINES],
}

impl PoolRegistry {
    fn new() -> Self {
        Self {
            engines: std::array::from_fn(|_| None),
        }
    }
}

thread_local! {
    static REGISTRY: RefCell<PoolRegistry> = RefCell::new(PoolRegistry::new());
}

/// Allocates an event of type `E` from the calling thread's pool for the
/// given engine, creating the pool on first use.
pub(crate) fn acquire<E: Pooled>(
    engine_id: usize,
    engine_outstanding: &Arc<AtomicUsize>,
) -> Box<E> {
    assert!(engine_id < MAX_ENGINES, "engine id out of range");
    REGISTRY.with(|registry| {
        let mut registry = registry.borrow_mut();
        let pools = registry.engines[engine_id].get_or_insert_with(HashMap::new);
        let entry = pools.entry(TypeId::of::<E>()).or_insert_with(|| {
            Box::new(PoolHandle::<E>::new(Arc::clone(engine_outstanding))) as Box<dyn Any>
        });
        let pool: &PoolHandle<E> = entry
            .downcast_ref()
            .expect("event pool registered under a foreign type id");
        pool.get()
    })
}
