//! Engine configuration.
//!
//! These types hold the concrete values that drive engine behavior. In most
//! cases you should use [`EngineBuilder`](crate::EngineBuilder) rather than
//! filling in an [`EngineConfig`] directly.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `thread_num` | available CPU parallelism |
//! | `worker_num` | `thread_num` |
//! | `thread_name_prefix` | `"evstrand-worker"` |
//! | `spin_iterations` | 100 |
//! | `poll_iterations` | 500 |
//! | `poll_sleep` | 50 µs |
//! | `default_stack_size` | [`StackSize::default()`] |
//!
//! # Environment Variables
//!
//! [`apply_env_overrides`] maps these variables onto config fields:
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `EVSTRAND_THREADS` | `usize` | `thread_num` |
//! | `EVSTRAND_WORKERS` | `usize` | `worker_num` |
//! | `EVSTRAND_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//! | `EVSTRAND_STACK_SIZE` | `usize` (bytes) | `default_stack_size` |

use crate::coro::StackSize;
use crate::error::{Error, ErrorKind, Result};
use std::time::Duration;

/// Environment variable name for the engine thread count.
pub const ENV_THREADS: &str = "EVSTRAND_THREADS";
/// Environment variable name for the worker (strand) count.
pub const ENV_WORKERS: &str = "EVSTRAND_WORKERS";
/// Environment variable name for the engine thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "EVSTRAND_THREAD_NAME_PREFIX";
/// Environment variable name for the default coroutine stack size in bytes.
pub const ENV_STACK_SIZE: &str = "EVSTRAND_STACK_SIZE";

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of dispatch threads (default: available parallelism).
    pub thread_num: usize,
    /// Number of workers, i.e. strands. Raised to `thread_num` if smaller.
    pub worker_num: usize,
    /// Name prefix for engine threads.
    pub thread_name_prefix: String,
    /// Non-blocking wake-counter reads before entering the poll phase.
    pub spin_iterations: usize,
    /// Sleep-and-recheck iterations before blocking on the condvar.
    pub poll_iterations: usize,
    /// Sleep between poll-phase iterations.
    pub poll_sleep: Duration,
    /// Stack size for coroutines spawned without an explicit size.
    pub default_stack_size: StackSize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thread_num: default_thread_num(),
            worker_num: 0,
            thread_name_prefix: "evstrand-worker".to_string(),
            spin_iterations: 100,
            poll_iterations: 500,
            poll_sleep: Duration::from_micros(50),
            default_stack_size: StackSize::default(),
        }
    }
}

impl EngineConfig {
    /// Normalize configuration values to safe defaults.
    ///
    /// A zero thread count is coerced to one; the worker count is raised to
    /// the thread count when smaller (a worker's home thread must exist).
    pub fn normalize(&mut self) {
        if self.thread_num == 0 {
            self.thread_num = 1;
        }
        if self.worker_num < self.thread_num {
            self.worker_num = self.thread_num;
        }
        if self.spin_iterations == 0 {
            self.spin_iterations = 1;
        }
        if self.thread_name_prefix.is_empty() {
            self.thread_name_prefix = "evstrand-worker".to_string();
        }
    }
}

fn default_thread_num() -> usize {
    std::thread::available_parallelism()
        .map_or(1, std::num::NonZeroUsize::get)
        .max(1)
}

/// Apply environment variable overrides to an [`EngineConfig`].
///
/// Only variables that are set in the environment are applied. Returns an
/// error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut EngineConfig) -> Result<()> {
    if let Some(val) = read_env(ENV_THREADS) {
        config.thread_num = parse_usize(ENV_THREADS, &val)?;
    }
    if let Some(val) = read_env(ENV_WORKERS) {
        config.worker_num = parse_usize(ENV_WORKERS, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    if let Some(val) = read_env(ENV_STACK_SIZE) {
        config.default_stack_size = StackSize::new(parse_usize(ENV_STACK_SIZE, &val)?);
    }
    Ok(())
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_usize(name: &str, val: &str) -> Result<usize> {
    val.parse().map_err(|_| {
        Error::new(ErrorKind::InvalidConfig).with_context(format!("{name}={val} is not a usize"))
    })
}
