use async_trait::async_trait;

use crate::context::ModuleContext;
use crate::error::Result;

/// Turns a raw payload into an executable module.
///
/// `Imports` is the import surface: whatever host bindings this runtime needs
/// to instantiate a module. The core never looks inside it.
#[async_trait]
pub trait ModuleRuntime: Send + Sync {
    type Imports: Send + Sync;

    /// Instantiate `payload` against `imports`. Malformed or incompatible
    /// payloads are [`Error::Instantiation`](crate::Error::Instantiation).
    async fn instantiate(
        &self,
        payload: Vec<u8>,
        imports: &Self::Imports,
    ) -> Result<Box<dyn ModuleInstance>>;
}

/// An instantiated module that has not started yet.
#[async_trait]
pub trait ModuleInstance: Send {
    /// Run the module's entry point.
    ///
    /// Returns once the module has installed its long-lived callbacks and
    /// yielded back to the host. Calling `context.signal_ready()` is how the
    /// module announces readiness; returning does not.
    async fn run(self: Box<Self>, context: ModuleContext) -> Result<()>;
}
