//! What a running module sees of its host.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bridge::Bridge;
use crate::loader::{LoadingState, LoadingStateCell};
use crate::readiness::ReadinessSignal;

/// The single path to firing readiness.
///
/// Fires only on a successful `Running -> Ready` transition, so readiness
/// never fires for a failed load and never fires twice, whichever side
/// (module or host) calls it first.
#[derive(Debug, Clone)]
pub struct ReadyGate {
    state: LoadingStateCell,
    readiness: ReadinessSignal,
}

impl ReadyGate {
    #[must_use]
    pub fn new(state: LoadingStateCell, readiness: ReadinessSignal) -> Self {
        Self { state, readiness }
    }

    /// Mark the module ready and fire the signal. Returns `false` if the
    /// state did not allow it.
    pub fn open(&self) -> bool {
        match self.state.transition(LoadingState::Ready) {
            Ok(()) => self.readiness.fire(),
            Err(e) => {
                if self.state.get() == LoadingState::Ready {
                    debug!("Readiness already signalled");
                } else {
                    warn!(error = %e, "Readiness refused");
                }
                false
            }
        }
    }
}

/// Handed to [`ModuleInstance::run`](crate::loader::ModuleInstance::run).
#[derive(Debug, Clone)]
pub struct ModuleContext {
    bridge: Bridge,
    gate: ReadyGate,
    lifecycle: CancellationToken,
}

impl ModuleContext {
    #[must_use]
    pub fn new(bridge: Bridge, gate: ReadyGate, lifecycle: CancellationToken) -> Self {
        Self {
            bridge,
            gate,
            lifecycle,
        }
    }

    /// Message bridge to the host
    #[must_use]
    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Called by the module once its own setup is complete.
    pub fn signal_ready(&self) -> bool {
        self.gate.open()
    }

    /// Cancelled when the host shuts the module down. Honoring it is up to
    /// the module.
    #[must_use]
    pub fn lifecycle(&self) -> &CancellationToken {
        &self.lifecycle
    }

    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.lifecycle.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplayPolicy;
    use crate::error::Error;
    use crate::event_bus::EventBus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn running_gate() -> (LoadingStateCell, ReadinessSignal, ReadyGate) {
        let state = LoadingStateCell::new();
        for next in [
            LoadingState::Fetching,
            LoadingState::Instantiating,
            LoadingState::Running,
        ] {
            state.transition(next).unwrap();
        }
        let readiness = ReadinessSignal::new(EventBus::new(), "ready", ReplayPolicy::Latch);
        let gate = ReadyGate::new(state.clone(), readiness.clone());
        (state, readiness, gate)
    }

    #[test]
    fn test_gate_fires_once() {
        let (state, readiness, gate) = running_gate();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        readiness.subscribe(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(gate.open());
        assert!(!gate.open());

        assert_eq!(state.get(), LoadingState::Ready);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_gate_refuses_after_failure() {
        let (state, readiness, gate) = running_gate();
        state.fail(Error::execution("trap"));

        assert!(!gate.open());
        assert!(!readiness.is_fired());
        assert_eq!(state.get(), LoadingState::Failed);
    }

    #[test]
    fn test_gate_refuses_before_running() {
        let state = LoadingStateCell::new();
        let readiness = ReadinessSignal::new(EventBus::new(), "ready", ReplayPolicy::Latch);
        let gate = ReadyGate::new(state, readiness.clone());

        assert!(!gate.open());
        assert!(!readiness.is_fired());
    }

    #[test]
    fn test_context_lifecycle() {
        let (_state, _readiness, gate) = running_gate();
        let token = CancellationToken::new();
        let ctx = ModuleContext::new(Bridge::new(EventBus::new(), "messages"), gate, token.clone());

        assert!(!ctx.is_shutdown_requested());
        token.cancel();
        assert!(ctx.is_shutdown_requested());
        assert!(ctx.lifecycle().is_cancelled());
        assert_eq!(ctx.bridge().channel(), "messages");
    }
}
