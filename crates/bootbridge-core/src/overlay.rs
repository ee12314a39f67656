//! Loading overlay contract.
//!
//! The core only decides *when* the indicator is shown and dismissed. How it
//! looks belongs to the [`Overlay`] implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info};

use crate::error::{format_error_for_overlay, Error};

/// Presentational loading indicator.
pub trait Overlay: Send + Sync {
    /// Show the indicator.
    fn show(&self);

    /// Remove the indicator.
    fn dismiss(&self);

    /// Bootstrap failed. The indicator stays up; implementations may switch
    /// it to an error display.
    fn fail(&self, _error: &Error) {}
}

/// Overlay that does nothing (headless hosts).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopOverlay;

impl Overlay for NoopOverlay {
    fn show(&self) {}

    fn dismiss(&self) {}
}

/// Overlay rendered as log lines.
#[derive(Debug, Clone)]
pub struct TracingOverlay {
    loading_text: String,
}

impl TracingOverlay {
    #[must_use]
    pub fn new(loading_text: impl Into<String>) -> Self {
        Self {
            loading_text: loading_text.into(),
        }
    }
}

impl Default for TracingOverlay {
    fn default() -> Self {
        Self::new("loading")
    }
}

impl Overlay for TracingOverlay {
    fn show(&self) {
        info!(text = %self.loading_text, "Overlay shown");
    }

    fn dismiss(&self) {
        info!("Overlay dismissed");
    }

    fn fail(&self, error: &Error) {
        error!(message = %format_error_for_overlay(error), "Overlay showing error");
    }
}

/// Wraps an [`Overlay`] so the bootstrap sequence can call it freely.
///
/// `show` and `dismiss` are idempotent. Once `fail` ran, `dismiss` is refused
/// so a failed load never looks like a successful one.
pub struct OverlayGuard {
    inner: Arc<dyn Overlay>,
    visible: AtomicBool,
    failed: AtomicBool,
}

impl OverlayGuard {
    #[must_use]
    pub fn new(inner: Arc<dyn Overlay>) -> Self {
        Self {
            inner,
            visible: AtomicBool::new(false),
            failed: AtomicBool::new(false),
        }
    }

    pub fn show(&self) {
        if !self.visible.swap(true, Ordering::SeqCst) {
            self.inner.show();
        }
    }

    /// Dismiss if visible and not failed. Returns whether the overlay was
    /// actually dismissed by this call.
    pub fn dismiss(&self) -> bool {
        if self.failed.load(Ordering::SeqCst) {
            return false;
        }
        if self.visible.swap(false, Ordering::SeqCst) {
            self.inner.dismiss();
            true
        } else {
            false
        }
    }

    pub fn fail(&self, error: &Error) {
        self.failed.store(true, Ordering::SeqCst);
        self.inner.fail(error);
    }

    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for OverlayGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayGuard")
            .field("visible", &self.is_visible())
            .field("failed", &self.has_failed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingOverlay {
        shows: AtomicUsize,
        dismissals: AtomicUsize,
        failures: AtomicUsize,
    }

    impl Overlay for CountingOverlay {
        fn show(&self) {
            self.shows.fetch_add(1, Ordering::SeqCst);
        }

        fn dismiss(&self) {
            self.dismissals.fetch_add(1, Ordering::SeqCst);
        }

        fn fail(&self, _error: &Error) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_dismiss_is_idempotent() {
        let overlay = Arc::new(CountingOverlay::default());
        let guard = OverlayGuard::new(overlay.clone());

        guard.show();
        guard.show();
        assert!(guard.dismiss());
        assert!(!guard.dismiss());

        assert_eq!(overlay.shows.load(Ordering::SeqCst), 1);
        assert_eq!(overlay.dismissals.load(Ordering::SeqCst), 1);
        assert!(!guard.is_visible());
    }

    #[test]
    fn test_failed_overlay_stays_visible() {
        let overlay = Arc::new(CountingOverlay::default());
        let guard = OverlayGuard::new(overlay.clone());

        guard.show();
        guard.fail(&Error::fetch("app.wasm", "timeout"));

        assert!(!guard.dismiss());
        assert!(guard.is_visible());
        assert!(guard.has_failed());
        assert_eq!(overlay.dismissals.load(Ordering::SeqCst), 0);
        assert_eq!(overlay.failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fail_before_show_does_not_mark_visible() {
        let overlay = Arc::new(CountingOverlay::default());
        let guard = OverlayGuard::new(overlay.clone());

        guard.fail(&Error::configuration("bad source"));

        assert!(!guard.is_visible());
        assert!(guard.has_failed());
        assert_eq!(overlay.shows.load(Ordering::SeqCst), 0);
        assert_eq!(overlay.failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dismiss_before_show_is_noop() {
        let overlay = Arc::new(CountingOverlay::default());
        let guard = OverlayGuard::new(overlay.clone());
        assert!(!guard.dismiss());
        assert_eq!(overlay.dismissals.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_builtin_overlays() {
        let guard = OverlayGuard::new(Arc::new(TracingOverlay::new("loading")));
        guard.show();
        guard.fail(&Error::execution("trap"));

        let noop = OverlayGuard::new(Arc::new(NoopOverlay));
        noop.show();
        assert!(noop.dismiss());
    }
}
