//! Host-level error reporting.
//!
//! Bootstrap failures are never swallowed: every one reaches an
//! [`ErrorReporter`]. Where it goes from there (logs, telemetry, a crash
//! dialog) is the host's business.

use std::sync::{Mutex, PoisonError};

use tracing::error;

use crate::error::Error;

/// Receives every bootstrap failure.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &Error);
}

/// Logs failures through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, error: &Error) {
        error!(
            code = error.code(),
            terminal = error.is_terminal(),
            error = %error,
            "Bootstrap failure"
        );
    }
}

/// Keeps reported failures in memory, for hosts that inspect them later.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    errors: Mutex<Vec<Error>>,
}

impl CollectingReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything reported so far, oldest first
    #[must_use]
    pub fn errors(&self) -> Vec<Error> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, error: &Error) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error.clone());
    }
}
