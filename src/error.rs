use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use uuid::Uuid;
use btleplug;
use serde_json;
use futures::channel::mpsc::SendError;

use crate::device::types::DeviceState;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (device): {source}")]
    DeviceError { #[from] source: DeviceError },

    #[error("Failed to read from the console: {source}")]
    Console { #[from] source: io::Error },

    #[error("Failed to start the async runtime: {source}")]
    Runtime { source: io::Error },
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("The peripheral was not found before the scan timed out")]
    ScanTimeout,

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("{0} took too long")]
    Deadline(&'static str),

    #[error("The peripheral does not expose the motor service")]
    MissingService,

    #[error("A required bluetooth characteristic is not available: {0}")]
    MissingCharacteristic(Uuid),

    #[error("The peripheral is not ready (state: {0})")]
    NotReady(DeviceState),

    #[error("A session is already in progress (state: {0})")]
    Busy(DeviceState),

    #[error("Steering is disabled while the peripheral is in automatic mode")]
    ManualControlLocked,

    #[error("The peripheral is no longer known to the adapter")]
    UnknownPeripheral,

    #[error("The controller has stopped: {source}")]
    ControllerStopped { #[from] source: SendError },
}

impl DeviceError {
    /// The peripheral is reachable but does not speak the expected protocol.
    pub fn is_protocol_mismatch(&self) -> bool {
        matches!(self, DeviceError::MissingService | DeviceError::MissingCharacteristic(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_failure_is_not_reported_as_console_error() {
        let err = AppRunError::Runtime { source: io::Error::new(io::ErrorKind::Other, "no threads") };
        assert_eq!(err.to_string(), "Failed to start the async runtime: no threads");
    }

    #[test]
    fn protocol_mismatch_covers_missing_gatt_entries() {
        assert!(DeviceError::MissingService.is_protocol_mismatch());
        assert!(DeviceError::MissingCharacteristic(Uuid::nil()).is_protocol_mismatch());
        assert!(!DeviceError::ScanTimeout.is_protocol_mismatch());
    }
}
