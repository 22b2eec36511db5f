//! Application settings with persistence.

use serde::{Deserialize, Serialize};

use crate::connection::CountMode;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AppSettings {
    #[serde(default)]
    pub copy: CopySettings,
}

/// Copy/paste defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CopySettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_true")]
    pub keep_alive_enabled: bool,
    #[serde(default = "default_keep_alive_interval_ms")]
    pub keep_alive_interval_ms: u64,
    #[serde(default = "default_keep_alive_timeout_ms")]
    pub keep_alive_timeout_ms: u64,
    #[serde(default = "default_max_recorded_errors")]
    pub max_recorded_errors: usize,
    #[serde(default)]
    pub count_mode: CountMode,
}

impl Default for CopySettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            keep_alive_enabled: true,
            keep_alive_interval_ms: default_keep_alive_interval_ms(),
            keep_alive_timeout_ms: default_keep_alive_timeout_ms(),
            max_recorded_errors: default_max_recorded_errors(),
            count_mode: CountMode::default(),
        }
    }
}

fn default_batch_size() -> u32 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_keep_alive_interval_ms() -> u64 {
    10_000
}

fn default_keep_alive_timeout_ms() -> u64 {
    600_000
}

fn default_max_recorded_errors() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let settings: AppSettings =
            serde_json::from_str(r#"{ "copy": { "batch_size": 250 } }"#).expect("valid json");

        assert_eq!(settings.copy.batch_size, 250);
        assert!(settings.copy.keep_alive_enabled);
        assert_eq!(settings.copy.keep_alive_interval_ms, 10_000);
        assert_eq!(settings.copy.max_recorded_errors, 100);
        assert_eq!(settings.copy.count_mode, CountMode::Estimated);
    }

    #[test]
    fn empty_object_is_default() {
        let settings: AppSettings = serde_json::from_str("{}").expect("valid json");
        assert_eq!(settings, AppSettings::default());
    }
}
