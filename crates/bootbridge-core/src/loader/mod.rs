//! Module loader
//!
//! Fetches a payload, instantiates it, and starts it:
//!
//! ```text
//! NotStarted -> Fetching -> Instantiating -> Running -> Ready
//!                  \              \             \
//!                   +--------------+-------------+--> Failed
//! ```
//!
//! `load` suspends only on the fetch and the instantiation. `run` never
//! suspends: the module's entry point runs on its own task. There is no way
//! to cancel a `load` in flight.

/// Module and running-module handles.
pub mod handle;
/// Runtime and instance contracts.
pub mod runtime;
/// Payload locations and fetching.
pub mod source;
/// Loading state machine.
pub mod state;

pub use handle::{ModuleHandle, RunningModule};
pub use runtime::{ModuleInstance, ModuleRuntime};
pub use source::{ModuleSource, PayloadFetcher, SourceFetcher};
pub use state::{LoadingState, LoadingStateCell};

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::context::ModuleContext;
use crate::error::{Error, Result};
use crate::event_bus::bus::panic_message;
use crate::reporter::ErrorReporter;

const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Drives one module through the loading state machine.
pub struct ModuleLoader<R: ModuleRuntime> {
    fetcher: Arc<dyn PayloadFetcher>,
    runtime: Arc<R>,
    state: LoadingStateCell,
    reporter: Arc<dyn ErrorReporter>,
    shutdown_timeout: Duration,
}

impl<R: ModuleRuntime> ModuleLoader<R> {
    /// Every failure is recorded in `state` and sent to `reporter`.
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn PayloadFetcher>,
        runtime: Arc<R>,
        state: LoadingStateCell,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            fetcher,
            runtime,
            state,
            reporter,
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        }
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn state(&self) -> &LoadingStateCell {
        &self.state
    }

    /// Fetch and instantiate the module at `source`.
    ///
    /// Resolves with a handle to the instantiated but not yet started module.
    pub async fn load(&self, source: &ModuleSource, imports: &R::Imports) -> Result<ModuleHandle> {
        self.state.transition(LoadingState::Fetching)?;
        info!(source = %source, "Fetching module");

        let payload = match self.fetcher.fetch(source).await {
            Ok(payload) => payload,
            Err(e) => return Err(self.failed(e)),
        };
        let payload_len = payload.len();

        self.state.transition(LoadingState::Instantiating)?;
        debug!(source = %source, bytes = payload_len, "Instantiating module");

        let instance = match self.runtime.instantiate(payload, imports).await {
            Ok(instance) => instance,
            Err(e) => return Err(self.failed(e)),
        };

        let handle = ModuleHandle::new(source.clone(), payload_len, instance);
        info!(module_id = %handle.id(), source = %source, bytes = payload_len, "Module instantiated");
        Ok(handle)
    }

    /// Start the module's entry point without waiting for it.
    ///
    /// Must be called from within a tokio runtime. An error or panic from the
    /// entry point before readiness moves the state to `Failed`; after
    /// readiness it is only reported.
    pub fn run(&self, handle: ModuleHandle, context: ModuleContext) -> Result<RunningModule> {
        self.state.transition(LoadingState::Running)?;

        let id = handle.id();
        let lifecycle = context.lifecycle().clone();
        let state = self.state.clone();
        let reporter = Arc::clone(&self.reporter);
        let instance = handle.into_instance();

        let task = tokio::spawn(async move {
            let error = match AssertUnwindSafe(instance.run(context)).catch_unwind().await {
                Ok(Ok(())) => {
                    if state.get() == LoadingState::Ready {
                        debug!(module_id = %id, "Module entry point returned");
                    } else {
                        info!(module_id = %id, "Module entry point returned before signalling readiness");
                    }
                    return;
                }
                Ok(Err(e)) => e,
                Err(panic) => {
                    Error::execution(format!("module panicked: {}", panic_message(panic.as_ref())))
                }
            };

            if !state.fail(error.clone()) {
                warn!(module_id = %id, error = %error, "Module failed after readiness");
            }
            reporter.report(&error);
        });

        info!(module_id = %id, "Module started");
        Ok(RunningModule::new(id, task, lifecycle, self.shutdown_timeout))
    }

    fn failed(&self, error: Error) -> Error {
        self.state.fail(error.clone());
        self.reporter.report(&error);
        error
    }
}
