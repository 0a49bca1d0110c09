//! Evstrand: strand-serialized event dispatch with stackful coroutines.
//!
//! # Overview
//!
//! Evstrand is the execution substrate for an actor framework: a
//! multi-threaded engine that accepts small units of work ("events") from
//! external producers and dispatches them to a pool of worker threads. Each
//! actor binds to a *strand* (one worker's queue), which guarantees its
//! events run in submission order and never concurrently with themselves.
//!
//! # Core Guarantees
//!
//! - **Strand serialization**: events pushed to one worker drain in the
//!   order their pushes linearized, by at most one thread at a time
//! - **No lost wakeups**: every successful submission increments the owning
//!   thread's wake counter before the producer returns
//! - **Home affinity with spillover**: a worker drains on its home thread
//!   under light load and is picked up by idle threads under imbalance
//! - **Auditable event ownership**: an event's box moves producer → queue →
//!   drain → pool; `handle` returns it for recycling or keeps it
//! - **Fault containment**: a panic escaping a handler runs the thread's
//!   fault and exit hooks instead of silently killing the thread
//!
//! # Module Structure
//!
//! - [`engine`]: the engine: threads, submission routing, lifecycle fan-out
//! - [`strand`]: per-actor serialization facade
//! - [`event`]: the `Event` trait and pooled event types
//! - [`pool`]: typed thread-local event pools
//! - [`coro`]: stackful coroutine contexts, spawning and resumption
//! - [`context`]: the per-thread context loaned to handlers
//! - [`fault`]: the panic boundary and captured fault traces
//! - [`logger`]: the level-tagged logging contract
//! - [`config`]: engine configuration and environment overrides
//! - [`error`]: error types
//!
//! # Example
//!
//! ```
//! use evstrand::{Engine, Strand};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let engine = Engine::builder().threads(2).workers(4).build();
//! let runner = {
//!     let engine = engine.clone();
//!     std::thread::spawn(move || engine.run())
//! };
//!
//! let hits = Arc::new(AtomicUsize::new(0));
//! let strand = Strand::new(&engine, 0);
//! for _ in 0..10 {
//!     let hits = Arc::clone(&hits);
//!     strand.post(move |_cx| {
//!         hits.fetch_add(1, Ordering::SeqCst);
//!     });
//! }
//!
//! while hits.load(Ordering::SeqCst) < 10 {
//!     std::thread::yield_now();
//! }
//! engine.stop();
//! runner.join().unwrap().unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_wrap)]

pub mod config;
pub mod context;
pub mod coro;
pub mod engine;
pub mod error;
pub mod event;
pub mod fault;
pub mod logger;
pub mod pool;
pub mod strand;

mod queue;
mod wake;
mod worker;
mod workshop;

// Re-exports for convenient access to core types
pub use config::EngineConfig;
pub use context::ThreadContext;
pub use coro::{CoroContext, CoroResumer, StackSize};
pub use engine::{Engine, EngineBuilder};
pub use error::{Error, ErrorKind, Result};
pub use event::{BoxEvent, Event, Pooled, PostEvent};
pub use fault::FaultTrace;
pub use logger::{Logger, NullLogger, TracingLogger};
pub use pool::{PoolHandle, MAX_ENGINES};
pub use strand::Strand;
