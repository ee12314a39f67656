//! Import surface offered to wasm modules

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};

use anyhow::{anyhow, Context as _};
use bootbridge_core::{Message, ModuleContext, Subscription};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use wasmtime::{Caller, Linker};

use crate::config::WasmConfig;

/// Namespace of the built-in bridge imports
pub const HOST_MODULE: &str = "bootbridge";

/// Export that reserves guest memory for an inbound message: `(len) -> ptr`
pub const ALLOC_EXPORT: &str = "alloc";

/// Export that receives inbound messages:
/// `(type_ptr, type_len, payload_ptr, payload_len) -> ()`
pub const HANDLER_EXPORT: &str = "on_message";

/// Per-store host data.
///
/// `context` is empty while the module is instantiated and filled in when
/// `run` starts, so bridge imports called from a start function trap.
#[derive(Default)]
pub struct HostState {
    pub context: Option<ModuleContext>,
    listening: bool,
    inbox: Option<Inbox>,
    echo: Arc<EchoFilter>,
}

impl HostState {
    fn context(&self) -> wasmtime::Result<&ModuleContext> {
        self.context
            .as_ref()
            .ok_or_else(|| anyhow!("bootbridge imports are unavailable before the module runs"))
    }

    /// Whether the module called `listen`
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub(crate) fn take_inbox(&mut self) -> Option<Inbox> {
        self.inbox.take()
    }
}

/// Host messages queued for a listening module.
pub(crate) struct Inbox {
    pub(crate) rx: mpsc::UnboundedReceiver<Message>,
    pub(crate) subscription: Subscription,
}

/// Keeps a listening module from receiving the message it is sending.
///
/// Bus delivery is synchronous, so the module's own message reaches its
/// inbox listener on the sending thread while the send is in progress.
#[derive(Default)]
struct EchoFilter {
    pending: Mutex<Option<(ThreadId, Message)>>,
}

impl EchoFilter {
    fn arm(&self, message: Message) {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((thread::current().id(), message));
    }

    fn disarm(&self) {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    fn is_echo(&self, message_type: &str, payload: &Value) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let echo = matches!(
            &*pending,
            Some((sender, message))
                if *sender == thread::current().id()
                    && message.message_type == message_type
                    && message.payload == *payload
        );
        if echo {
            *pending = None;
        }
        echo
    }
}

type Registrar = Box<dyn Fn(&mut Linker<HostState>) -> wasmtime::Result<()> + Send + Sync>;

/// Host functions made available to a module in addition to the built-ins.
pub struct WasmImports {
    registrars: Vec<Registrar>,
    trap_unknown_imports: bool,
}

impl WasmImports {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registrars: Vec::new(),
            trap_unknown_imports: false,
        }
    }

    #[must_use]
    pub fn from_config(config: &WasmConfig) -> Self {
        Self::new().trap_unknown_imports(config.trap_unknown_imports)
    }

    /// Add host functions to the linker.
    ///
    /// ```ignore
    /// let imports = WasmImports::new().with(|linker| {
    ///     linker.func_wrap("env", "now_ms", || 0_i64)?;
    ///     Ok(())
    /// });
    /// ```
    #[must_use]
    pub fn with<F>(mut self, registrar: F) -> Self
    where
        F: Fn(&mut Linker<HostState>) -> wasmtime::Result<()> + Send + Sync + 'static,
    {
        self.registrars.push(Box::new(registrar));
        self
    }

    #[must_use]
    pub fn trap_unknown_imports(mut self, enabled: bool) -> Self {
        self.trap_unknown_imports = enabled;
        self
    }

    pub(crate) fn traps_unknown_imports(&self) -> bool {
        self.trap_unknown_imports
    }

    /// Register the built-ins, then every host registrar.
    pub(crate) fn register(&self, linker: &mut Linker<HostState>) -> wasmtime::Result<()> {
        register_builtins(linker)?;
        for registrar in &self.registrars {
            registrar(linker)?;
        }
        Ok(())
    }
}

impl Default for WasmImports {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WasmImports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WasmImports")
            .field("registrars", &self.registrars.len())
            .field("trap_unknown_imports", &self.trap_unknown_imports)
            .finish()
    }
}

fn register_builtins(linker: &mut Linker<HostState>) -> wasmtime::Result<()> {
    linker.func_wrap(HOST_MODULE, "ready", |caller: Caller<'_, HostState>| -> wasmtime::Result<()> {
        if !caller.data().context()?.signal_ready() {
            debug!("Module signalled readiness again");
        }
        Ok(())
    })?;

    linker.func_wrap(
        HOST_MODULE,
        "send_message",
        |mut caller: Caller<'_, HostState>,
         type_ptr: u32,
         type_len: u32,
         payload_ptr: u32,
         payload_len: u32|
         -> wasmtime::Result<()> {
            let memory = caller
                .get_export("memory")
                .and_then(|export| export.into_memory())
                .ok_or_else(|| anyhow!("module does not export 'memory'"))?;

            let (message_type, payload) = {
                let data = memory.data(&caller);
                let message_type = std::str::from_utf8(guest_bytes(data, type_ptr, type_len)?)
                    .context("message type is not UTF-8")?
                    .to_owned();
                let raw = guest_bytes(data, payload_ptr, payload_len)?;
                let payload = if raw.is_empty() {
                    Value::Null
                } else {
                    serde_json::from_slice(raw).context("message payload is not JSON")?
                };
                (message_type, payload)
            };

            let state = caller.data();
            let bridge = state.context()?.bridge();
            if state.is_listening() {
                state.echo.arm(Message::new(message_type.clone(), payload.clone()));
            }
            let delivered = bridge.send_message(message_type, payload);
            state.echo.disarm();
            if delivered == 0 {
                warn!("Module message had no listeners");
            }
            Ok(())
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "listen",
        |mut caller: Caller<'_, HostState>| -> wasmtime::Result<()> {
            let state = caller.data_mut();
            if state.is_listening() {
                debug!("Module already listening");
                return Ok(());
            }

            let bridge = state.context()?.bridge().clone();
            let echo = Arc::clone(&state.echo);
            let (tx, rx) = mpsc::unbounded_channel();
            let subscription = bridge.on_message(move |message_type, payload| {
                if echo.is_echo(message_type, payload) {
                    return;
                }
                // Fails only once the module stopped serving.
                let _ = tx.send(Message::new(message_type, payload.clone()));
            });
            debug!(channel = %bridge.channel(), "Module listening for host messages");
            state.listening = true;
            state.inbox = Some(Inbox { rx, subscription });
            Ok(())
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "shutdown_requested",
        |caller: Caller<'_, HostState>| -> i32 {
            caller
                .data()
                .context
                .as_ref()
                .map_or(0, |context| i32::from(context.is_shutdown_requested()))
        },
    )?;

    Ok(())
}

fn guest_bytes(data: &[u8], ptr: u32, len: u32) -> wasmtime::Result<&[u8]> {
    let start = ptr as usize;
    let end = start
        .checked_add(len as usize)
        .ok_or_else(|| anyhow!("guest range overflows"))?;
    data.get(start..end)
        .ok_or_else(|| anyhow!("guest range {}..{} outside memory of {} bytes", start, end, data.len()))
}
