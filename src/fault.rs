//! Fault facility: the panic boundary around each engine thread.
//!
//! `invoke` runs a body and, if the body panics, hands a captured
//! [`FaultTrace`] to a recovery closure instead of letting the thread die
//! silently. The backtrace is captured at the panic site by a chained panic
//! hook, so recovery sees where the fault happened rather than where it was
//! caught. Threads outside an `invoke` scope keep the previously installed
//! hook behavior.

use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

/// A captured fault: panic message plus backtrace frames.
///
/// `frames` is never empty; when frame resolution yields nothing the
/// message itself stands in as the only frame.
#[derive(Debug, Clone)]
pub struct FaultTrace {
    message: String,
    frames: Vec<String>,
}

impl FaultTrace {
    /// The panic payload rendered as text.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Backtrace frames, outermost last. Never empty.
    #[must_use]
    pub fn frames(&self) -> &[String] {
        &self.frames
    }

    fn from_parts(payload: &(dyn std::any::Any + Send), backtrace: Option<Backtrace>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());

        let mut frames: Vec<String> = backtrace
            .map(|bt| {
                bt.to_string()
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if frames.is_empty() {
            frames.push(message.clone());
        }

        Self { message, frames }
    }
}

thread_local! {
    /// Set while the current thread is inside `invoke`.
    static IN_FAULT_SCOPE: Cell<bool> = const { Cell::new(false) };
    /// Backtrace captured by the hook at the most recent panic site.
    static CAPTURED: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

fn install_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if IN_FAULT_SCOPE.with(Cell::get) {
                CAPTURED.with(|slot| {
                    *slot.borrow_mut() = Some(Backtrace::force_capture());
                });
            } else {
                previous(info);
            }
        }));
    });
}

/// Runs `body`; on panic, runs `recovery` with the captured trace.
///
/// `state` is threaded through both closures so a caller can hand the same
/// mutable context to the normal path and the recovery path. Returns `true`
/// when the body completed without faulting.
pub fn invoke<T>(
    state: &mut T,
    body: impl FnOnce(&mut T),
    recovery: impl FnOnce(&mut T, &FaultTrace),
) -> bool {
    install_hook();
    IN_FAULT_SCOPE.with(|flag| flag.set(true));
    let result = panic::catch_unwind(AssertUnwindSafe(|| body(state)));
    IN_FAULT_SCOPE.with(|flag| flag.set(false));

    match result {
        Ok(()) => true,
        Err(payload) => {
            let backtrace = CAPTURED.with(|slot| slot.borrow_mut().take());
            let trace = FaultTrace::from_parts(payload.as_ref(), backtrace);
            recovery(state, &trace);
            false
        }
    }
}
