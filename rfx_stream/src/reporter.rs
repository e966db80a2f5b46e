//! Streaming error reporting.
//!
//! Streamer threads surface LATE/OVERFLOW/UNDERFLOW conditions through a
//! user-provided callback with an opaque context. The callback slot has
//! its own lock, independent of streamer state, so installing a handler
//! never contends with the data path.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;

/// Consecutive late observations folded into one callback invocation.
pub const LATE_DEBOUNCE: u32 = 5;

/// Condition reported to the user callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorEvent {
    /// A TX packet reached the device past its deadline. `rx` marks the
    /// receive side as origin.
    Late { rx: bool },
    /// The RX path overran.
    Overflow,
    /// The TX path underran.
    Underflow,
    Other,
}

pub type ErrorHandler = Box<dyn FnMut(ErrorEvent) + Send>;

#[derive(Default)]
struct Inner {
    handler: Mutex<Option<ErrorHandler>>,
    lates: AtomicU32,
}

/// Cloneable handle shared between the engine and both streamer threads.
#[derive(Clone, Default)]
pub struct ErrorReporter {
    inner: Arc<Inner>,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_handler(&self, handler: ErrorHandler) {
        *self.inner.handler.lock().unwrap() = Some(handler);
    }

    fn dispatch(&self, event: ErrorEvent) {
        if let Some(handler) = self.inner.handler.lock().unwrap().as_mut() {
            handler(event);
        }
    }

    /// One late observation. Fires the callback once per
    /// [`LATE_DEBOUNCE`] consecutive observations.
    pub fn late(&self, rx: bool) {
        let count = self.inner.lates.fetch_add(1, Ordering::AcqRel) + 1;
        if count >= LATE_DEBOUNCE {
            self.inner.lates.store(0, Ordering::Release);
            debug!("late burst reported after {count} observations");
            self.dispatch(ErrorEvent::Late { rx });
        }
    }

    /// A clean late-register read; breaks the consecutive run.
    pub fn late_clear(&self) {
        self.inner.lates.store(0, Ordering::Release);
    }

    pub fn overflow(&self) {
        self.dispatch(ErrorEvent::Overflow);
    }

    pub fn underflow(&self) {
        self.dispatch(ErrorEvent::Underflow);
    }

    pub fn other(&self) {
        self.dispatch(ErrorEvent::Other);
    }
}
