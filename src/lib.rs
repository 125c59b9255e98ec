use std::env;
use std::time::Duration;
use clap::Parser;
use futures::channel::mpsc::channel;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::io::ConfigIO;
use crate::config::types::Config;
use crate::console::run_console;
use crate::device::connection::BtleTransport;
use crate::device::constants::SHUTDOWN_GRACE;
use crate::device::controller::Controller;
use crate::device::dispatcher::spawn_controller;
use crate::device::transport::TransportEvent;
use crate::device::types::DeviceEvent;
use crate::error::AppRunError;

pub mod config;
pub mod console;
pub mod device;
pub mod error;

#[derive(Parser, Debug, Default)]
#[command(version, about = "Drive a BLE motor controller from the terminal")]
pub struct Options {
    /// Advertised name of the peripheral, matched exactly
    #[arg(long)]
    pub name: Option<String>,

    /// How long to scan before giving up, e.g. "10s"
    #[arg(long, value_parser = humantime::parse_duration)]
    pub scan_timeout: Option<Duration>,

    /// Do not read or lock the config file
    #[arg(long)]
    pub no_config: bool,

    /// Write the effective settings back to the config file
    #[arg(long, conflicts_with = "no_config")]
    pub save_config: bool,

    /// Start scanning right away
    #[arg(long)]
    pub scan: bool,
}

impl Options {
    /// Command line flags take precedence over the config file.
    pub fn apply(&self, config: &mut Config) {
        if let Some(name) = &self.name {
            config.target_name = name.clone();
        }

        if let Some(timeout) = self.scan_timeout {
            config.scan_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        }
    }
}

pub fn init_logging() {
    let level = env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(
            fern::log_file(log_file).expect("Failed to open LOG_FILE")
        );
    }

    dispatch.apply().expect("Failed to initialize logger");
}

async fn load_config(config_io: &ConfigIO) -> Config {
    match config_io.read().await {
        Ok(config) => config,
        Err(err) => {
            if err.is_file_not_found_error() {
                info!("Config file not found, using defaults");
            } else {
                error!("Failed to load config, using defaults: {}", err);
            }
            Config::default()
        },
    }
}

async fn run_async(options: Options) -> Result<(), AppRunError> {
    let config_io = if options.no_config { None } else { Some(ConfigIO::new_sync()?) };

    // one instance per host, so at most one session drives the adapter
    let mut locker = config_io.as_ref().map(ConfigIO::locker).transpose()?;
    let _lock_guard = match locker.as_mut() {
        Some(locker) => Some(locker.lock()?),
        None => None,
    };

    let mut config = match &config_io {
        Some(config_io) => load_config(config_io).await,
        None => Config::default(),
    };
    options.apply(&mut config);

    if options.save_config {
        if let Some(config_io) = &config_io {
            config_io.save(&config).await?;
        }
    }

    info!("Looking for {:?}, scan timeout {}", config.target_name, humantime::format_duration(config.scan_timeout()));

    let cancel = CancellationToken::new();
    let (transport_tx, transport_rx) = channel::<TransportEvent>(64);
    let (events_tx, events_rx) = channel::<DeviceEvent>(64);

    let transport = BtleTransport::new(transport_tx, cancel.clone()).await?;
    let controller = Controller::new(transport, config.controller_settings());
    let (handle, controller_handle) = spawn_controller(controller, transport_rx, cancel.clone(), vec![events_tx]);

    let result = run_console(handle, events_rx, options.scan).await;

    cancel.cancel();
    if let Err(err) = controller_handle.await {
        warn!("Controller task failed: {}", err);
    }
    tokio::time::sleep(Duration::from_millis(SHUTDOWN_GRACE)).await;

    result
}

pub fn run(options: Options) -> Result<(), AppRunError> {
    let runtime = tokio::runtime::Runtime::new().map_err(|source| AppRunError::Runtime { source })?;
    runtime.block_on(run_async(options))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let options = Options::parse_from(["motor-remote", "--name", "ROVER", "--scan-timeout", "2s 500ms"]);
        let mut config = Config::default();

        options.apply(&mut config);

        assert_eq!(config.target_name, "ROVER");
        assert_eq!(config.scan_timeout_ms, 2500);
    }

    #[test]
    fn config_is_kept_without_flags() {
        let options = Options::parse_from(["motor-remote"]);
        let mut config = Config { target_name: "ROVER".to_string(), scan_timeout_ms: 42 };

        options.apply(&mut config);

        assert_eq!(config, Config { target_name: "ROVER".to_string(), scan_timeout_ms: 42 });
    }

    #[test]
    fn save_conflicts_with_no_config() {
        assert!(Options::try_parse_from(["motor-remote", "--no-config", "--save-config"]).is_err());
    }
}
