//! Level-tagged logging consumed by the engine.
//!
//! The engine only needs three levels of plain-text output, so the contract
//! is a small object-safe trait rather than a direct dependency on a
//! specific backend. [`TracingLogger`] forwards to the `tracing` crate;
//! [`NullLogger`] discards everything. When no logger is supplied at
//! construction, debug builds default to [`TracingLogger`] and release
//! builds to [`NullLogger`].

use std::sync::Arc;

/// Thread-safe, level-tagged text logger.
pub trait Logger: Send + Sync + 'static {
    /// Logs at info level.
    fn info(&self, msg: &str);
    /// Logs at debug level.
    fn debug(&self, msg: &str);
    /// Logs at error level.
    fn error(&self, msg: &str);
}

/// Logger backed by the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, msg: &str) {
        tracing::info!(target: "evstrand", "{msg}");
    }

    fn debug(&self, msg: &str) {
        tracing::debug!(target: "evstrand", "{msg}");
    }

    fn error(&self, msg: &str) {
        tracing::error!(target: "evstrand", "{msg}");
    }
}

/// Logger that discards all output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn info(&self, _msg: &str) {}
    fn debug(&self, _msg: &str) {}
    fn error(&self, _msg: &str) {}
}

/// The logger used when the caller does not supply one.
pub(crate) fn default_logger() -> Arc<dyn Logger> {
    if cfg!(debug_assertions) {
        Arc::new(TracingLogger)
    } else {
        Arc::new(NullLogger)
    }
}
