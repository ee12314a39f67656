//! Wasm runtime settings

use serde::{Deserialize, Serialize};

/// `[wasm]` configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WasmConfig {
    /// Export called by `run`
    #[serde(default = "default_entry_point")]
    pub entry_point: String,
    /// Satisfy imports nobody registered with functions that trap when called
    #[serde(default)]
    pub trap_unknown_imports: bool,
}

fn default_entry_point() -> String {
    "_start".to_string()
}

impl Default for WasmConfig {
    fn default() -> Self {
        Self {
            entry_point: default_entry_point(),
            trap_unknown_imports: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WasmConfig::default();
        assert_eq!(config.entry_point, "_start");
        assert!(!config.trap_unknown_imports);
    }

    #[test]
    fn test_partial_json() {
        let config: WasmConfig = serde_json::from_str(r#"{"trap_unknown_imports": true}"#).unwrap();
        assert_eq!(config.entry_point, "_start");
        assert!(config.trap_unknown_imports);
    }
}
