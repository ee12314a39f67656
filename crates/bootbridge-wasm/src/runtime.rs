//! wasmtime-backed [`ModuleRuntime`]

use std::sync::Arc;

use async_trait::async_trait;
use bootbridge_core::{Error, Message, ModuleContext, ModuleInstance, ModuleRuntime, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use wasmtime::{Engine, Instance, Linker, Memory, Module, Store, TypedFunc};

use crate::config::WasmConfig;
use crate::imports::{HostState, WasmImports, ALLOC_EXPORT, HANDLER_EXPORT};

/// Compiles and instantiates WebAssembly payloads.
///
/// Accepts binary modules and, for tests and tooling, the text format.
#[derive(Clone)]
pub struct WasmRuntime {
    engine: Engine,
    entry_point: Arc<str>,
}

impl WasmRuntime {
    pub fn new(config: &WasmConfig) -> Result<Self> {
        if config.entry_point.is_empty() {
            return Err(Error::configuration("wasm.entry_point must not be empty"));
        }
        let engine = Engine::new(&wasmtime::Config::new())
            .map_err(|e| Error::configuration(format!("failed to create wasm engine: {e:#}")))?;

        Ok(Self {
            engine,
            entry_point: Arc::from(config.entry_point.as_str()),
        })
    }

    #[must_use]
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }
}

impl std::fmt::Debug for WasmRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmRuntime")
            .field("entry_point", &self.entry_point)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ModuleRuntime for WasmRuntime {
    type Imports = WasmImports;

    async fn instantiate(&self, payload: Vec<u8>, imports: &WasmImports) -> Result<Box<dyn ModuleInstance>> {
        let engine = self.engine.clone();
        let module = tokio::task::spawn_blocking(move || Module::new(&engine, &payload))
            .await
            .map_err(|e| Error::Internal(format!("compilation task failed: {e}")))?
            .map_err(|e| Error::instantiation(format!("compilation failed: {e:#}")))?;
        debug!(imports = module.imports().len(), "Module compiled");

        let mut linker = Linker::new(&self.engine);
        imports
            .register(&mut linker)
            .map_err(|e| Error::instantiation(format!("failed to register imports: {e:#}")))?;
        if imports.traps_unknown_imports() {
            linker
                .define_unknown_imports_as_traps(&module)
                .map_err(|e| Error::instantiation(format!("{e:#}")))?;
        }

        let engine = self.engine.clone();
        let (store, instance) = tokio::task::spawn_blocking(move || {
            let mut store = Store::new(&engine, HostState::default());
            let instance = linker.instantiate(&mut store, &module)?;
            Ok::<_, wasmtime::Error>((store, instance))
        })
        .await
        .map_err(|e| Error::Internal(format!("instantiation task failed: {e}")))?
        .map_err(|e| Error::instantiation(format!("{e:#}")))?;

        info!(entry_point = %self.entry_point, "Wasm module instantiated");
        Ok(Box::new(WasmInstance {
            store,
            instance,
            entry_point: Arc::clone(&self.entry_point),
        }))
    }
}

struct WasmInstance {
    store: Store<HostState>,
    instance: Instance,
    entry_point: Arc<str>,
}

#[async_trait]
impl ModuleInstance for WasmInstance {
    /// Call the entry point. A module that called `listen` keeps being served
    /// host messages until its lifecycle token is cancelled.
    async fn run(self: Box<Self>, context: ModuleContext) -> Result<()> {
        let WasmInstance {
            mut store,
            instance,
            entry_point,
        } = *self;
        let lifecycle = context.lifecycle().clone();
        let bridge = context.bridge().clone();
        store.data_mut().context = Some(context);

        let (mut store, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = call_entry(&mut store, instance, &entry_point);
            (store, outcome)
        })
        .await
        .map_err(|e| Error::execution(format!("module task failed: {e}")))?;

        let Some(mut inbox) = store.data_mut().take_inbox() else {
            return outcome;
        };
        let result = match outcome {
            Ok(()) => serve(store, instance, &mut inbox.rx, &lifecycle).await,
            Err(e) => Err(e),
        };
        bridge.off(&inbox.subscription);
        result
    }
}

fn call_entry(store: &mut Store<HostState>, instance: Instance, entry_point: &str) -> Result<()> {
    let entry = instance
        .get_typed_func::<(), ()>(&mut *store, entry_point)
        .map_err(|e| Error::execution(format!("entry point '{}' unavailable: {e:#}", entry_point)))?;
    debug!(entry_point = %entry_point, "Calling module entry point");
    entry
        .call(&mut *store, ())
        .map_err(|e| Error::execution(format!("{e:#}")))
}

/// Deliver queued host messages one at a time until cancelled.
async fn serve(
    mut store: Store<HostState>,
    instance: Instance,
    rx: &mut mpsc::UnboundedReceiver<Message>,
    lifecycle: &CancellationToken,
) -> Result<()> {
    let handler = MessageHandler::resolve(&mut store, instance)?;
    info!("Serving host messages to module");

    loop {
        let message = tokio::select! {
            () = lifecycle.cancelled() => break,
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let handler = handler.clone();
        store = tokio::task::spawn_blocking(move || {
            handler.deliver(&mut store, &message)?;
            Ok::<_, Error>(store)
        })
        .await
        .map_err(|e| Error::execution(format!("module task failed: {e}")))??;
    }

    debug!("Module stopped serving host messages");
    Ok(())
}

/// Guest exports used to hand a message to a listening module.
#[derive(Clone)]
struct MessageHandler {
    alloc: TypedFunc<u32, u32>,
    on_message: TypedFunc<(u32, u32, u32, u32), ()>,
    memory: Memory,
}

impl MessageHandler {
    fn resolve(store: &mut Store<HostState>, instance: Instance) -> Result<Self> {
        let missing = |name: &str, e: wasmtime::Error| {
            Error::execution(format!("module listens but export '{}' is unusable: {e:#}", name))
        };
        let alloc = instance
            .get_typed_func::<u32, u32>(&mut *store, ALLOC_EXPORT)
            .map_err(|e| missing(ALLOC_EXPORT, e))?;
        let on_message = instance
            .get_typed_func::<(u32, u32, u32, u32), ()>(&mut *store, HANDLER_EXPORT)
            .map_err(|e| missing(HANDLER_EXPORT, e))?;
        let memory = instance
            .get_memory(&mut *store, "memory")
            .ok_or_else(|| Error::execution("module listens but does not export 'memory'"))?;

        Ok(Self {
            alloc,
            on_message,
            memory,
        })
    }

    /// Copy `[type bytes][payload JSON]` into one guest allocation and call
    /// the handler with both ranges.
    fn deliver(&self, store: &mut Store<HostState>, message: &Message) -> Result<()> {
        let type_bytes = message.message_type.as_bytes();
        let payload = serde_json::to_vec(&message.payload)?;
        let type_len = u32::try_from(type_bytes.len())
            .map_err(|_| Error::execution("message type exceeds guest address space"))?;
        let payload_len = u32::try_from(payload.len())
            .map_err(|_| Error::execution("message payload exceeds guest address space"))?;
        let total = type_len
            .checked_add(payload_len)
            .ok_or_else(|| Error::execution("message exceeds guest address space"))?;

        let ptr = self
            .alloc
            .call(&mut *store, total)
            .map_err(|e| Error::execution(format!("{ALLOC_EXPORT} failed: {e:#}")))?;
        let payload_ptr = ptr
            .checked_add(type_len)
            .ok_or_else(|| Error::execution(format!("{ALLOC_EXPORT} returned an unusable pointer")))?;
        self.memory
            .write(&mut *store, ptr as usize, type_bytes)
            .and_then(|()| self.memory.write(&mut *store, payload_ptr as usize, &payload))
            .map_err(|e| Error::execution(format!("{ALLOC_EXPORT} returned an out-of-bounds range: {e}")))?;

        debug!(message_type = %message.message_type, bytes = total, "Delivering host message to module");
        self.on_message
            .call(&mut *store, (ptr, type_len, payload_ptr, payload_len))
            .map_err(|e| Error::execution(format!("{e:#}")))
    }
}
