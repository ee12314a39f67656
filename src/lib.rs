//! Bootbridge - bootstrap a precompiled module and bridge messages to it
//!
//! Re-exports the core sequence from [`bootbridge_core`] and, with the `wasm`
//! feature (on by default), the wasmtime runtime from `bootbridge_wasm`.
//! Adds the host-side edges: layered configuration loading and tracing setup.
//!
//! ```ignore
//! let settings = bootbridge::config_loader::load_config()?;
//! bootbridge::telemetry::init_tracing(&settings.bootstrap.logging);
//!
//! let runtime = WasmRuntime::new(&settings.wasm)?;
//! let imports = WasmImports::from_config(&settings.wasm);
//! let session = Bootstrapper::new(settings.bootstrap, runtime, imports)?
//!     .start()
//!     .await?;
//! session.wait_ready().await?;
//! ```

#![forbid(unsafe_code)]

pub mod config_loader;
pub mod telemetry;

pub use bootbridge_core::*;

#[cfg(feature = "wasm")]
pub use bootbridge_wasm as wasm;
#[cfg(feature = "wasm")]
pub use bootbridge_wasm::{WasmConfig, WasmImports, WasmRuntime};

pub use config_loader::{load_config, load_config_from, Settings};
