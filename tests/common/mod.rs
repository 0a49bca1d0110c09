#![allow(dead_code)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use std::sync::Once;
use std::time::{Duration, Instant};

static INIT_LOGGING: Once = Once::new();

/// Initializes tracing output for tests (once per process).
///
/// Controlled by `RUST_LOG`; defaults to warnings only so passing runs stay
/// quiet.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Default deadline for engine-driven assertions.
pub const DEADLINE: Duration = Duration::from_secs(10);

/// Polls `check` until it returns true or `deadline` elapses.
pub fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    check()
}
