use clap::Parser;
use log::info;
use ble_motor_remote::{init_logging, run, Options};
use ble_motor_remote::error::{AppRunError, ConfigError};

fn main() -> Result<(), AppRunError> {
    init_logging();
    info!(concat!("BLE Motor Remote ", env!("CARGO_PKG_VERSION")));

    let options = Options::parse();

    match run(options) {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            eprintln!("This application has already been started");
            Ok(())
        },
        Err(err) => {
            eprintln!("Unexpected error: {}", err);
            Err(err)
        },
        Ok(_) => Ok(()),
    }
}
