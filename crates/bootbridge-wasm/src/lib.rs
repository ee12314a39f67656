//! Bootbridge WASM - run WebAssembly modules under the bootstrap sequence
//!
//! [`WasmRuntime`] implements [`bootbridge_core::ModuleRuntime`] on top of
//! `wasmtime`. Modules talk to the host through a small import surface under
//! the `bootbridge` namespace:
//!
//! | Import | Signature | Effect |
//! |---|---|---|
//! | `ready` | `() -> ()` | signal readiness |
//! | `send_message` | `(type_ptr, type_len, payload_ptr, payload_len) -> ()` | publish a message (UTF-8 type, JSON payload) |
//! | `shutdown_requested` | `() -> i32` | `1` once the host asked the module to stop |
//! | `listen` | `() -> ()` | receive host messages after the entry point returns |
//!
//! Pointers refer to the module's exported `memory`. A listening module also
//! exports `alloc(len) -> ptr` and
//! `on_message(type_ptr, type_len, payload_ptr, payload_len)`; it is served
//! until the lifecycle token is cancelled.

#![forbid(unsafe_code)]

pub mod config;
pub mod imports;
pub mod runtime;

pub use config::WasmConfig;
pub use imports::{HostState, WasmImports, HOST_MODULE};
pub use runtime::WasmRuntime;
