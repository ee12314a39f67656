use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::runtime::ModuleInstance;
use super::source::ModuleSource;

/// An instantiated module, owned by the loader until it is run.
pub struct ModuleHandle {
    id: Uuid,
    source: ModuleSource,
    payload_len: usize,
    loaded_at: DateTime<Utc>,
    instance: Box<dyn ModuleInstance>,
}

impl ModuleHandle {
    pub(crate) fn new(source: ModuleSource, payload_len: usize, instance: Box<dyn ModuleInstance>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            payload_len,
            loaded_at: Utc::now(),
            instance,
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn source(&self) -> &ModuleSource {
        &self.source
    }

    /// Size of the fetched payload in bytes
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    #[must_use]
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub(crate) fn into_instance(self) -> Box<dyn ModuleInstance> {
        self.instance
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("payload_len", &self.payload_len)
            .field("loaded_at", &self.loaded_at)
            .finish_non_exhaustive()
    }
}

/// A module whose entry point has been started.
///
/// Dropping this does not stop the module; call [`shutdown`](Self::shutdown).
#[derive(Debug)]
pub struct RunningModule {
    id: Uuid,
    task: JoinHandle<()>,
    lifecycle: CancellationToken,
    shutdown_timeout: Duration,
}

impl RunningModule {
    pub(crate) fn new(
        id: Uuid,
        task: JoinHandle<()>,
        lifecycle: CancellationToken,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            id,
            task,
            lifecycle,
            shutdown_timeout,
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the module's entry point has returned (or failed)
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Token the module was given; cancelled by `shutdown`.
    #[must_use]
    pub fn lifecycle(&self) -> &CancellationToken {
        &self.lifecycle
    }

    /// Ask the module to stop and wait for its task.
    ///
    /// The module is expected to honor its lifecycle token. If it has not
    /// finished within the shutdown timeout the task is aborted. Returns
    /// `true` on a graceful stop.
    pub async fn shutdown(self) -> bool {
        info!(module_id = %self.id, "Shutting down module");
        self.lifecycle.cancel();

        let mut task = self.task;
        match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
            Ok(_) => {
                info!(module_id = %self.id, "Module stopped");
                true
            }
            Err(_) => {
                warn!(
                    module_id = %self.id,
                    timeout_secs = self.shutdown_timeout.as_secs(),
                    "Module did not stop in time, aborting"
                );
                task.abort();
                false
            }
        }
    }
}
