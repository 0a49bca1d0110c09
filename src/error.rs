//! Error types for the engine's fallible surface.
//!
//! Most misuse of the engine is a programming error and is handled by
//! assertions (engine id exhaustion, strand index out of range). The
//! `Error` type here covers the small set of conditions a caller can
//! reasonably react to: double `run`, and malformed configuration input.

use core::fmt;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// `run` was called while the engine was already running.
    AlreadyRunning,
    /// A configuration value could not be parsed or was out of range.
    InvalidConfig,
    /// Internal engine error (bug).
    Internal,
}

/// The main error type for engine operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Adds context text to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
