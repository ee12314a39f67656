//! Bootstrap configuration types
//!
//! Deserialized from TOML/env by the root crate's loader. Every field has a
//! default so a partial file is always valid.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub module: ModuleConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BootstrapConfig {
    /// Config pointing at `source`, everything else default.
    #[must_use]
    pub fn with_source(source: impl Into<String>) -> Self {
        Self {
            module: ModuleConfig {
                source: source.into(),
            },
            ..Self::default()
        }
    }

    /// Reject settings the bootstrap sequence cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.module.source.trim().is_empty() {
            return Err(Error::configuration("module.source must not be empty"));
        }
        if self.channels.ready.is_empty() || self.channels.messages.is_empty() {
            return Err(Error::configuration("channel names must not be empty"));
        }
        if self.channels.ready == self.channels.messages {
            return Err(Error::configuration(format!(
                "channels.ready and channels.messages must differ (both '{}')",
                self.channels.ready
            )));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(Error::configuration("fetch.timeout_secs must be positive"));
        }
        Ok(())
    }
}

/// Where the module payload lives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// URL (http, https, file) or local path
    #[serde(default = "default_source")]
    pub source: String,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
        }
    }
}

fn default_source() -> String {
    "module.wasm".to_string()
}

/// Payload retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
}

impl FetchConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
        }
    }
}

fn default_fetch_timeout() -> u64 {
    30
}

/// Well-known channel names on the event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default = "default_ready_channel")]
    pub ready: String,
    #[serde(default = "default_messages_channel")]
    pub messages: String,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            ready: default_ready_channel(),
            messages: default_messages_channel(),
        }
    }
}

fn default_ready_channel() -> String {
    "bootbridge:ready".to_string()
}

fn default_messages_channel() -> String {
    "bootbridge:messages".to_string()
}

/// What happens to readiness subscribers registered after the signal fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayPolicy {
    /// Late subscribers run immediately
    #[default]
    Latch,
    /// Late subscribers never run
    Event,
}

/// Readiness signal settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadinessConfig {
    #[serde(default)]
    pub replay: ReplayPolicy,
}

/// Loading indicator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    #[serde(default = "default_loading_text")]
    pub loading_text: String,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            loading_text: default_loading_text(),
        }
    }
}

fn default_loading_text() -> String {
    "loading".to_string()
}

/// Module lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// How long `shutdown` waits for the module task before aborting it
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl LifecycleConfig {
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

fn default_shutdown_timeout() -> u64 {
    5
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging settings, applied by the host's tracing initialisation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_filter() -> String {
    "bootbridge=info,bootbridge_core=info,bootbridge_wasm=info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = BootstrapConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.module.source, "module.wasm");
        assert_eq!(config.readiness.replay, ReplayPolicy::Latch);
        assert_eq!(config.fetch.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_rejects_empty_source() {
        let config = BootstrapConfig::with_source("  ");
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "configuration_error");
    }

    #[test]
    fn test_rejects_shared_channel() {
        let mut config = BootstrapConfig::default();
        config.channels.messages = config.channels.ready.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let mut config = BootstrapConfig::default();
        config.fetch.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: BootstrapConfig = serde_json::from_str(
            r#"{"module": {"source": "https://cdn.test/app.wasm"}, "readiness": {"replay": "event"}}"#,
        )
        .unwrap();
        assert_eq!(config.module.source, "https://cdn.test/app.wasm");
        assert_eq!(config.readiness.replay, ReplayPolicy::Event);
        assert_eq!(config.channels.ready, "bootbridge:ready");
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }
}
