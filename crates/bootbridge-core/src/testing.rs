//! Scripted stand-ins for the fetcher and the module runtime.
//!
//! Useful for exercising the bootstrap sequence without a real payload or
//! engine, in this crate's tests and in host test suites.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::context::ModuleContext;
use crate::error::{Error, Result};
use crate::loader::{ModuleInstance, ModuleRuntime, ModuleSource, PayloadFetcher};

/// Fetcher that returns a fixed payload or a fixed failure.
#[derive(Debug)]
pub struct StaticFetcher {
    outcome: std::result::Result<Vec<u8>, String>,
    fetches: AtomicUsize,
}

impl StaticFetcher {
    #[must_use]
    pub fn ok(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            outcome: Ok(payload.into()),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Every fetch fails with a transport error carrying `message`.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            outcome: Err(message.into()),
            fetches: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PayloadFetcher for StaticFetcher {
    async fn fetch(&self, source: &ModuleSource) -> Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            Ok(payload) => Ok(payload.clone()),
            Err(message) => Err(Error::fetch(source.to_string(), message.clone())),
        }
    }
}

type Script = Arc<dyn Fn(ModuleContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

enum Behavior {
    Run(Script),
    RejectPayload(String),
}

/// Runtime whose modules run a host-supplied script.
pub struct ScriptedRuntime {
    behavior: Behavior,
    instantiations: AtomicUsize,
}

impl ScriptedRuntime {
    /// Modules run `script` synchronously as their entry point.
    #[must_use]
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(ModuleContext) -> Result<()> + Send + Sync + 'static,
    {
        let script = Arc::new(script);
        Self::from_async(move |ctx| {
            let script = Arc::clone(&script);
            async move { script(ctx) }
        })
    }

    /// Modules run the future returned by `script` as their entry point.
    #[must_use]
    pub fn from_async<F, Fut>(script: F) -> Self
    where
        F: Fn(ModuleContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let script: Script = Arc::new(move |ctx: ModuleContext| -> BoxFuture<'static, Result<()>> {
            Box::pin(script(ctx))
        });
        Self {
            behavior: Behavior::Run(script),
            instantiations: AtomicUsize::new(0),
        }
    }

    /// Every instantiation fails with `message`.
    #[must_use]
    pub fn rejecting(message: impl Into<String>) -> Self {
        Self {
            behavior: Behavior::RejectPayload(message.into()),
            instantiations: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn instantiations(&self) -> usize {
        self.instantiations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModuleRuntime for ScriptedRuntime {
    type Imports = ();

    async fn instantiate(&self, _payload: Vec<u8>, _imports: &()) -> Result<Box<dyn ModuleInstance>> {
        self.instantiations.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Run(script) => Ok(Box::new(ScriptedInstance {
                script: Arc::clone(script),
            })),
            Behavior::RejectPayload(message) => Err(Error::instantiation(message.clone())),
        }
    }
}

struct ScriptedInstance {
    script: Script,
}

#[async_trait]
impl ModuleInstance for ScriptedInstance {
    async fn run(self: Box<Self>, context: ModuleContext) -> Result<()> {
        (self.script)(context).await
    }
}
