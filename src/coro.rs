//! Stackful coroutine execution context.
//!
//! A spawned coroutine runs user code that may suspend cooperatively and be
//! resumed later, always on a thread currently holding its home worker. The
//! underlying primitive is a pair of switch points: `swap(into, from)` opens
//! the target's gate and blocks on the source's, so exactly one side of a
//! coroutine is ever running. Each context is backed by a dedicated thread
//! whose stack size honors the requested [`StackSize`]; a coroutine that
//! returns normally ends its thread, freeing the stack.
//!
//! Resumption rides the engine itself: a [`CoroResumer`] posts a resume
//! event to the coroutine's home strand, so the swap back in happens inside
//! that worker's drain, serialized with the rest of the strand's events.

use crate::context::ThreadContext;
use crate::engine::Engine;
use crate::event::{BoxEvent, Event, Pooled};
use crate::fault;
use crate::pool::PoolHandle;
use crate::strand::Strand;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

/// Smallest stack the engine will request for a coroutine.
const MIN_STACK_SIZE: usize = 64 * 1024;

/// Default coroutine stack size.
const DEFAULT_STACK_SIZE: usize = 128 * 1024;

/// Requested stack size for a spawned coroutine, clamped to a safe minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackSize(usize);

impl StackSize {
    /// Creates a stack size of `bytes`, raised to the platform-safe minimum.
    #[must_use]
    pub fn new(bytes: usize) -> Self {
        Self(bytes.max(MIN_STACK_SIZE))
    }

    /// The size in bytes.
    #[must_use]
    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for StackSize {
    fn default() -> Self {
        Self(DEFAULT_STACK_SIZE)
    }
}

/// One side of a coroutine swap: a latched gate.
///
/// `open` releases one `pass`; `pass` blocks until opened and consumes the
/// latch. The latch makes the pair race-free: an `open` that arrives before
/// the matching `pass` is not lost.
#[derive(Debug, Default)]
pub(crate) struct Context {
    open: Mutex<bool>,
    condvar: Condvar,
}

impl Context {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn open(&self) {
        let mut open = self.open.lock().expect("switch point mutex poisoned");
        *open = true;
        self.condvar.notify_one();
    }

    fn pass(&self) {
        let mut open = self.open.lock().expect("switch point mutex poisoned");
        while !*open {
            open = self
                .condvar
                .wait(open)
                .expect("switch point condvar poisoned");
        }
        *open = false;
    }
}

/// Transfers control: wakes `into`, blocks the caller on `from`.
pub(crate) fn swap(into: &Context, from: &Context) {
    into.open();
    from.pass();
}

/// Sequence for coroutine thread names.
static NEXT_CORO: AtomicU64 = AtomicU64::new(0);

/// Creates a coroutine context: a parked thread with the requested stack
/// that runs `entry` once swapped into.
fn make_context(
    stack: StackSize,
    name: String,
    context: Arc<Context>,
    entry: impl FnOnce() + Send + 'static,
) {
    thread::Builder::new()
        .name(name)
        .stack_size(stack.get())
        .spawn(move || {
            context.pass();
            entry();
        })
        .expect("failed to spawn coroutine context thread");
}

/// Shared state of one coroutine, reachable from its home worker's events.
struct CoroState {
    /// The coroutine's home worker index; resumption always targets it.
    home: usize,
    /// The coroutine side's switch point.
    context: Arc<Context>,
    /// Switch point of the thread currently hosting the coroutine.
    host: Mutex<Option<Arc<Context>>>,
    /// Set by the coroutine right before its final swap out.
    finished: AtomicBool,
    /// The spawn event, parked here while the coroutine is suspended so its
    /// pool recycling waits for completion.
    spawn_event: Mutex<Option<Box<SpawnEvent>>>,
}

impl CoroState {
    fn new(home: usize, context: Arc<Context>) -> Self {
        Self {
            home,
            context,
            host: Mutex::new(None),
            finished: AtomicBool::new(false),
            spawn_event: Mutex::new(None),
        }
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn store_spawn(&self, event: Box<SpawnEvent>) {
        *self.spawn_event.lock().expect("spawn slot poisoned") = Some(event);
    }

    fn take_spawn(&self) -> Option<Box<SpawnEvent>> {
        self.spawn_event.lock().expect("spawn slot poisoned").take()
    }

    fn set_host(&self, host: Arc<Context>) {
        *self.host.lock().expect("host slot poisoned") = Some(host);
    }

    fn take_host(&self) -> Arc<Context> {
        self.host
            .lock()
            .expect("host slot poisoned")
            .take()
            .expect("coroutine has no host context")
    }
}

/// Swaps the dispatching thread into the coroutine and blocks until the
/// coroutine suspends or completes. Must be called while holding the
/// coroutine's home worker.
fn enter(state: &CoroState, cx: &ThreadContext) {
    let host = Arc::clone(cx.host_context());
    state.set_host(Arc::clone(&host));
    swap(&state.context, &host);
}

/// Context passed to a coroutine body.
pub struct CoroContext {
    engine: Engine,
    state: Arc<CoroState>,
}

impl CoroContext {
    /// The engine that spawned this coroutine.
    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Index of the coroutine's home worker.
    #[must_use]
    pub fn home_worker(&self) -> usize {
        self.state.home
    }

    /// The home strand; events posted here serialize with this coroutine's
    /// resumptions.
    #[must_use]
    pub fn strand(&self) -> Strand {
        Strand::new(&self.engine, self.state.home)
    }

    /// A token that schedules this coroutine's resumption onto its home
    /// strand. Clone it into channels, timers, or other strands.
    #[must_use]
    pub fn resumer(&self) -> CoroResumer {
        CoroResumer {
            engine: self.engine.clone(),
            state: Arc::clone(&self.state),
        }
    }

    /// Suspends until a [`CoroResumer`] fires. The caller must have
    /// arranged a resumption first, or the coroutine never runs again.
    pub fn suspend(&mut self) {
        let host = self.state.take_host();
        swap(&host, &self.state.context);
    }

    /// Cooperative yield: schedules an immediate resumption on the home
    /// strand, then suspends. Events already queued on the home strand run
    /// before the coroutine continues.
    pub fn yield_now(&mut self) {
        self.resumer().resume();
        self.suspend();
    }
}

impl std::fmt::Debug for CoroContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoroContext")
            .field("home_worker", &self.state.home)
            .field("finished", &self.state.is_finished())
            .finish()
    }
}

/// Schedules a suspended coroutine's resumption onto its home strand.
#[derive(Clone)]
pub struct CoroResumer {
    engine: Engine,
    state: Arc<CoroState>,
}

impl CoroResumer {
    /// Posts a resume event to the coroutine's home strand.
    ///
    /// Safe to call from any thread. Resuming an already-completed
    /// coroutine is a no-op.
    pub fn resume(&self) {
        let mut event = self.engine.make_event::<ResumeEvent>();
        event.set_state(Arc::clone(&self.state));
        self.engine.submit_to(self.state.home, event);
    }
}

impl std::fmt::Debug for CoroResumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoroResumer")
            .field("home_worker", &self.state.home)
            .finish()
    }
}

/// Boxed coroutine body.
pub(crate) type CoroFn = Box<dyn FnOnce(&mut CoroContext) + Send + 'static>;

/// Pooled event that creates and first-enters a coroutine when dispatched.
#[derive(Default)]
pub struct SpawnEvent {
    body: Option<CoroFn>,
    stack: StackSize,
    pool: Option<PoolHandle<SpawnEvent>>,
}

impl SpawnEvent {
    pub(crate) fn set_body(&mut self, body: CoroFn) {
        self.body = Some(body);
    }

    pub(crate) fn set_stack(&mut self, stack: StackSize) {
        self.stack = stack;
    }
}

impl Event for SpawnEvent {
    fn handle(mut self: Box<Self>, cx: &mut ThreadContext) -> Option<BoxEvent> {
        let Some(body) = self.body.take() else {
            return Some(self);
        };
        let home = cx
            .worker_index()
            .expect("spawn event dispatched outside a worker drain");
        let engine = cx.engine().clone();

        let context = Arc::new(Context::new());
        let state = Arc::new(CoroState::new(home, Arc::clone(&context)));
        let name = format!(
            "{}-coro-{}",
            engine.name_prefix(),
            NEXT_CORO.fetch_add(1, Ordering::Relaxed)
        );

        let entry = {
            let state = Arc::clone(&state);
            let engine = engine.clone();
            move || {
                let mut cctx = CoroContext {
                    engine,
                    state: Arc::clone(&state),
                };
                let logger = Arc::clone(cctx.engine.logger());
                fault::invoke(
                    &mut cctx,
                    |cctx| body(cctx),
                    |cctx, trace| {
                        logger.error(&format!(
                            "coroutine on worker {} faulted: {}\n{}",
                            cctx.state.home,
                            trace.message(),
                            trace.frames().join("\n")
                        ));
                    },
                );
                state.finished.store(true, Ordering::Release);
                let host = state.take_host();
                host.open();
            }
        };
        make_context(self.stack, name, Arc::clone(&context), entry);

        state.store_spawn(self);
        enter(&state, cx);

        if state.is_finished() {
            state.take_spawn().map(|event| event as BoxEvent)
        } else {
            None
        }
    }

    fn release(mut self: Box<Self>) {
        if let Some(pool) = self.pool.take() {
            pool.put(self);
        }
    }
}

impl Pooled for SpawnEvent {
    fn bind_pool(&mut self, pool: PoolHandle<Self>) {
        self.pool = Some(pool);
    }

    fn reset(&mut self) {
        self.body = None;
        self.stack = StackSize::default();
    }
}

/// Pooled event that swaps a suspended coroutine back in.
#[derive(Default)]
pub(crate) struct ResumeEvent {
    state: Option<Arc<CoroState>>,
    pool: Option<PoolHandle<ResumeEvent>>,
}

impl ResumeEvent {
    fn set_state(&mut self, state: Arc<CoroState>) {
        self.state = Some(state);
    }
}

impl Event for ResumeEvent {
    fn handle(mut self: Box<Self>, cx: &mut ThreadContext) -> Option<BoxEvent> {
        if let Some(state) = self.state.take() {
            if !state.is_finished() {
                enter(&state, cx);
            }
            if state.is_finished() {
                // Last resumption: the parked spawn event can recycle now.
                if let Some(spawn) = state.take_spawn() {
                    spawn.release();
                }
            }
        }
        Some(self)
    }

    fn release(mut self: Box<Self>) {
        if let Some(pool) = self.pool.take() {
            pool.put(self);
        }
    }
}

impl Pooled for ResumeEvent {
    fn bind_pool(&mut self, pool: PoolHandle<Self>) {
        self.pool = Some(pool);
    }

    fn reset(&mut self) {
        self.state = None;
    }
}
