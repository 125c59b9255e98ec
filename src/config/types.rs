use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::device::constants::{DEFAULT_SCAN_TIMEOUT, DEFAULT_TARGET_NAME};
use crate::device::controller::ControllerSettings;

fn default_target_name() -> String {
    DEFAULT_TARGET_NAME.to_string()
}

fn default_scan_timeout_ms() -> u64 {
    DEFAULT_SCAN_TIMEOUT
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Advertised name of the peripheral to connect to, matched exactly.
    #[serde(default = "default_target_name")]
    pub target_name: String,
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
}

impl Config {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            target_name: self.target_name.clone(),
            scan_timeout: self.scan_timeout(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            target_name: default_target_name(),
            scan_timeout_ms: default_scan_timeout_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config: Config = serde_json::from_str(r#"{"targetName": "ROVER"}"#).unwrap();
        assert_eq!(config.target_name, "ROVER");
        assert_eq!(config.scan_timeout(), Duration::from_secs(10));

        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn uses_camel_case_keys() {
        let json = serde_json::to_value(Config { target_name: "ARDUINO".to_string(), scan_timeout_ms: 2500 }).unwrap();
        assert_eq!(json, serde_json::json!({"targetName": "ARDUINO", "scanTimeoutMs": 2500}));
    }

    #[test]
    fn converts_to_controller_settings() {
        let settings = Config { target_name: "ROVER".to_string(), scan_timeout_ms: 500 }.controller_settings();
        assert_eq!(settings.target_name, "ROVER");
        assert_eq!(settings.scan_timeout, Duration::from_millis(500));
    }
}
