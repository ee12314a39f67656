//! Bootstrap sequence
//!
//! Ties the pieces together in order:
//!
//! 1. overlay shown
//! 2. module fetched and instantiated
//! 3. message bridge wired onto the bus
//! 4. module started with a [`ModuleContext`]
//! 5. module signals readiness, the overlay is dismissed and host
//!    subscribers run
//!
//! ## Usage
//!
//! ```ignore
//! let bootstrapper = Bootstrapper::new(config, runtime, imports)?
//!     .with_overlay(Arc::new(TracingOverlay::new("loading")));
//!
//! // Register before start so the module cannot fire first.
//! bootstrapper.readiness().subscribe(|| println!("ready"));
//!
//! let session = bootstrapper.start().await?;
//! session.bridge().on_message(|kind, payload| println!("{kind}: {payload}"));
//! session.wait_ready().await?;
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::bridge::Bridge;
use crate::config::BootstrapConfig;
use crate::context::{ModuleContext, ReadyGate};
use crate::error::{Error, Result};
use crate::event_bus::EventBus;
use crate::loader::{
    LoadingState, LoadingStateCell, ModuleLoader, ModuleRuntime, ModuleSource, PayloadFetcher,
    RunningModule, SourceFetcher,
};
use crate::overlay::{Overlay, OverlayGuard, TracingOverlay};
use crate::readiness::ReadinessSignal;
use crate::reporter::{ErrorReporter, TracingReporter};

/// Forwards failures to the host reporter and flips the overlay to its error
/// state while loading has failed.
struct FailureSink {
    reporter: Arc<dyn ErrorReporter>,
    overlay: Arc<OverlayGuard>,
    state: LoadingStateCell,
}

impl ErrorReporter for FailureSink {
    fn report(&self, error: &Error) {
        self.reporter.report(error);
        if self.state.get() == LoadingState::Failed {
            self.overlay.fail(error);
        }
    }
}

/// Configured, not yet started bootstrap sequence.
pub struct Bootstrapper<R: ModuleRuntime> {
    config: BootstrapConfig,
    source: ModuleSource,
    runtime: Arc<R>,
    imports: R::Imports,
    bus: EventBus,
    readiness: ReadinessSignal,
    state: LoadingStateCell,
    fetcher: Arc<dyn PayloadFetcher>,
    overlay: Arc<OverlayGuard>,
    reporter: Arc<dyn ErrorReporter>,
}

impl<R: ModuleRuntime> Bootstrapper<R> {
    /// Validate `config` and prepare a sequence for `runtime`.
    ///
    /// Configuration problems (bad source, unusable HTTP client) surface
    /// here, so `start` only fails once loading is under way.
    pub fn new(config: BootstrapConfig, runtime: R, imports: R::Imports) -> Result<Self> {
        config.validate()?;
        let source = ModuleSource::parse(&config.module.source)?;
        let fetcher = SourceFetcher::from_config(&config.fetch)?;
        let bus = EventBus::new();
        let readiness = ReadinessSignal::new(
            bus.clone(),
            config.channels.ready.clone(),
            config.readiness.replay,
        );

        let overlay = TracingOverlay::new(config.overlay.loading_text.clone());

        Ok(Self {
            config,
            source,
            runtime: Arc::new(runtime),
            imports,
            bus,
            readiness,
            state: LoadingStateCell::new(),
            fetcher: Arc::new(fetcher),
            overlay: Arc::new(OverlayGuard::new(Arc::new(overlay))),
            reporter: Arc::new(TracingReporter),
        })
    }

    /// Use an existing bus.
    ///
    /// Replaces the readiness signal, so call this before subscribing to
    /// [`readiness`](Self::readiness).
    #[must_use]
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.readiness = ReadinessSignal::new(
            bus.clone(),
            self.config.channels.ready.clone(),
            self.config.readiness.replay,
        );
        self.bus = bus;
        self
    }

    /// Replace the default `reqwest`/filesystem fetcher.
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn PayloadFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    #[must_use]
    pub fn with_overlay(mut self, overlay: Arc<dyn Overlay>) -> Self {
        self.overlay = Arc::new(OverlayGuard::new(overlay));
        self
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Subscribe here, before `start`, to be sure not to miss readiness.
    #[must_use]
    pub fn readiness(&self) -> &ReadinessSignal {
        &self.readiness
    }

    #[must_use]
    pub fn state(&self) -> &LoadingStateCell {
        &self.state
    }

    #[must_use]
    pub fn overlay(&self) -> &OverlayGuard {
        &self.overlay
    }

    /// Run the sequence up to the point where the module is started.
    ///
    /// Resolves as soon as the module's entry point has been spawned; use
    /// [`Session::wait_ready`] to wait for readiness. Every failure is
    /// recorded in the state, reported, and leaves the overlay up in its
    /// failed state.
    pub async fn start(self) -> Result<Session> {
        info!(source = %self.source, "Bootstrapping module");
        self.overlay.show();
        {
            let overlay = Arc::clone(&self.overlay);
            self.readiness.subscribe(move || {
                if overlay.dismiss() {
                    debug!("Overlay dismissed on readiness");
                }
            });
        }

        let sink: Arc<dyn ErrorReporter> = Arc::new(FailureSink {
            reporter: Arc::clone(&self.reporter),
            overlay: Arc::clone(&self.overlay),
            state: self.state.clone(),
        });
        let loader = ModuleLoader::new(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.runtime),
            self.state.clone(),
            sink,
        )
            .with_shutdown_timeout(self.config.lifecycle.shutdown_timeout());

        let handle = loader.load(&self.source, &self.imports).await?;

        let bridge = Bridge::new(self.bus.clone(), self.config.channels.messages.clone());
        let gate = ReadyGate::new(self.state.clone(), self.readiness.clone());
        let context = ModuleContext::new(bridge.clone(), gate.clone(), CancellationToken::new());
        let module = loader.run(handle, context)?;

        Ok(Session {
            bus: self.bus,
            bridge,
            readiness: self.readiness,
            state: self.state,
            gate,
            overlay: self.overlay,
            module,
        })
    }
}

/// A started module and the host's handles onto it.
#[derive(Debug)]
pub struct Session {
    bus: EventBus,
    bridge: Bridge,
    readiness: ReadinessSignal,
    state: LoadingStateCell,
    gate: ReadyGate,
    overlay: Arc<OverlayGuard>,
    module: RunningModule,
}

impl Session {
    /// Message bridge to the module
    #[must_use]
    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    #[must_use]
    pub fn readiness(&self) -> &ReadinessSignal {
        &self.readiness
    }

    /// Current loading state
    #[must_use]
    pub fn state(&self) -> LoadingState {
        self.state.get()
    }

    #[must_use]
    pub fn state_cell(&self) -> &LoadingStateCell {
        &self.state
    }

    #[must_use]
    pub fn overlay(&self) -> &OverlayGuard {
        &self.overlay
    }

    #[must_use]
    pub fn module_id(&self) -> Uuid {
        self.module.id()
    }

    /// Host-side readiness path. Converges with the module's own call: only
    /// the first of the two fires.
    pub fn signal_ready(&self) -> bool {
        self.gate.open()
    }

    /// Wait until the module is ready and every readiness subscriber has
    /// run, or return the failure that stopped it.
    pub async fn wait_ready(&self) -> Result<()> {
        self.state.settled().await?;
        self.readiness.wait().await;
        Ok(())
    }

    /// Cancel the module's lifecycle token and wait for it to stop.
    pub async fn shutdown(self) -> bool {
        self.module.shutdown().await
    }
}
