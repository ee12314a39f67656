//! Configuration loading
//!
//! Handles loading configuration from embedded defaults, files, and environment.

use anyhow::{Context, Result};
use bootbridge_core::BootstrapConfig;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use std::path::Path;

#[cfg(feature = "wasm")]
use bootbridge_wasm::WasmConfig;
#[cfg(feature = "wasm")]
use serde::Deserialize;

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Everything the host needs to bootstrap a module
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub bootstrap: BootstrapConfig,
    #[cfg(feature = "wasm")]
    pub wasm: WasmConfig,
}

#[cfg(feature = "wasm")]
#[derive(Deserialize)]
struct WasmSection {
    #[serde(default)]
    wasm: WasmConfig,
}

/// Load configuration from files and environment
pub fn load_config() -> Result<Settings> {
    let env = std::env::var("BOOTBRIDGE_ENV").unwrap_or_else(|_| "development".to_string());
    let config = defaults()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{}", env)).required(false))
        .add_source(File::with_name("config/local").required(false))
        .add_source(environment())
        .build()
        .context("Failed to build configuration")?;

    into_settings(config)
}

/// Load configuration from one explicit file on top of the embedded
/// defaults. Environment variables still take precedence.
pub fn load_config_from(path: impl AsRef<Path>) -> Result<Settings> {
    let path = path.as_ref();
    let config = defaults()
        .add_source(File::from(path).required(true))
        .add_source(environment())
        .build()
        .with_context(|| format!("Failed to build configuration from {}", path.display()))?;

    into_settings(config)
}

fn defaults() -> ConfigBuilder<config::builder::DefaultState> {
    Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
}

// BOOTBRIDGE_MODULE__SOURCE -> module.source
fn environment() -> Environment {
    Environment::with_prefix("BOOTBRIDGE")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn into_settings(config: Config) -> Result<Settings> {
    let bootstrap: BootstrapConfig = config
        .clone()
        .try_deserialize()
        .context("Failed to deserialize configuration")?;
    bootstrap
        .validate()
        .context("Invalid bootstrap configuration")?;

    #[cfg(feature = "wasm")]
    let section: WasmSection = config
        .try_deserialize()
        .context("Failed to deserialize [wasm] configuration")?;
    #[cfg(not(feature = "wasm"))]
    drop(config);

    Ok(Settings {
        bootstrap,
        #[cfg(feature = "wasm")]
        wasm: section.wasm,
    })
}
