//! Store configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_MAX_HISTORY_SIZE: usize = 50;
pub const DEFAULT_PERSIST_DEBOUNCE_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
/// Construction-time options for [`crate::StateManager`].
pub struct StoreConfig {
    /// Maximum retained undo entries. Values below 1 are treated as 1.
    pub max_history_size: usize,
    /// Installs the logging middleware.
    pub debug_mode: bool,
    /// Debounce window for scheduled saves.
    pub persist_debounce_ms: u64,
    /// Installs the persistence middleware.
    pub persistence_enabled: bool,
    /// Lets `ADD_COMPONENT` create a default section on an empty document.
    pub auto_create_sections: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_history_size: DEFAULT_MAX_HISTORY_SIZE,
            debug_mode: false,
            persist_debounce_ms: DEFAULT_PERSIST_DEBOUNCE_MS,
            persistence_enabled: true,
            auto_create_sections: true,
        }
    }
}

impl StoreConfig {
    /// Reads options from a host-provided data object, ignoring missing or mistyped keys.
    ///
    /// Recognized keys: `debugMode`, `maxHistorySize`, `autoSaveDelay`,
    /// `persistenceEnabled`, `autoCreateSections`.
    pub fn from_host_data(data: &Value) -> Self {
        let mut config = Self::default();
        let Some(object) = data.as_object() else {
            return config;
        };
        if let Some(debug) = object.get("debugMode").and_then(Value::as_bool) {
            config.debug_mode = debug;
        }
        if let Some(size) = object.get("maxHistorySize").and_then(Value::as_u64) {
            config.max_history_size = size as usize;
        }
        if let Some(delay) = object.get("autoSaveDelay").and_then(Value::as_u64) {
            config.persist_debounce_ms = delay;
        }
        if let Some(enabled) = object.get("persistenceEnabled").and_then(Value::as_bool) {
            config.persistence_enabled = enabled;
        }
        if let Some(enabled) = object.get("autoCreateSections").and_then(Value::as_bool) {
            config.auto_create_sections = enabled;
        }
        config
    }

    pub fn effective_history_size(&self) -> usize {
        self.max_history_size.max(1)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn host_data_overrides_known_keys_and_ignores_the_rest() {
        let config = StoreConfig::from_host_data(&json!({
            "debugMode": true,
            "maxHistorySize": 5,
            "autoSaveDelay": "soon",
            "unrelated": 1,
        }));
        assert_eq!(
            config,
            StoreConfig {
                debug_mode: true,
                max_history_size: 5,
                ..StoreConfig::default()
            }
        );
    }

    #[test]
    fn non_object_host_data_yields_defaults() {
        assert_eq!(StoreConfig::from_host_data(&json!(null)), StoreConfig::default());
    }

    #[test]
    fn partial_serde_config_fills_defaults() {
        let config: StoreConfig =
            serde_json::from_value(json!({"debug_mode": true})).expect("config");
        assert!(config.debug_mode);
        assert_eq!(config.max_history_size, DEFAULT_MAX_HISTORY_SIZE);
        assert_eq!(StoreConfig { max_history_size: 0, ..config }.effective_history_size(), 1);
    }
}
