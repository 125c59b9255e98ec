use std::env::current_exe;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::str;
use std::sync::{Arc, Mutex};
use directories_next::ProjectDirs;
use fd_lock::{RwLock, RwLockWriteGuard};
use log::{info, warn};
use serde_json;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::config::types::Config;
use crate::error::ConfigError;

// motor-remote.json next to the executable, so the tool can run from removable media
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            if !path.set_extension("json") {
                warn!("current exe has no filename: {}", path.to_string_lossy());
                return None;
            }

            Some(path)
        },
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

// ble-motor-remote.json in the os dependent config directory, such as ~/.config on linux
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "ble-motor-remote").map(|dirs| {
        dirs.config_dir().join("ble-motor-remote.json")
    })
}

fn get_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = get_portable_config_path() {
        if path.is_file() {
            return Ok(path);
        }
    }

    get_local_config_path().ok_or(ConfigError::NoConfigPath)
}

/// Holds the exclusive lock that keeps a second instance from driving the same adapter.
pub struct ConfigIOLocker {
    rw_lock: RwLock<std::fs::File>,
}

impl ConfigIOLocker {
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<std::fs::File>, ConfigError> {
        self.rw_lock.try_write().map_err(|source| ConfigError::CanNotLock { source })
    }
}

#[derive(Clone)]
pub struct ConfigIO {
    file: Arc<Mutex<std::fs::File>>,
}

impl ConfigIO {
    /// Opens (creating if needed) the config file at the default location.
    pub fn new_sync() -> Result<Self, ConfigError> {
        Self::open_sync(&get_config_path()?)
    }

    pub fn open_sync(path: &Path) -> Result<Self, ConfigError> {
        info!("Using config file {}", path.to_string_lossy());

        if let Some(directory) = path.parent() {
            std::fs::create_dir_all(directory)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .append(false)
            .create(true)
            .open(path)?;

        Ok(ConfigIO { file: Arc::new(Mutex::new(file)) })
    }

    pub fn locker(&self) -> Result<ConfigIOLocker, ConfigError> {
        Ok(ConfigIOLocker {
            rw_lock: RwLock::new(self.clone_std_file()?),
        })
    }

    fn clone_std_file(&self) -> Result<std::fs::File, ConfigError> {
        let file = self.file.lock().expect("Failed to lock ConfigIO file");
        Ok(file.try_clone()?)
    }

    // The File returned from here should never be closed!
    fn get_file(&self) -> Result<File, ConfigError> {
        Ok(File::from_std(self.clone_std_file()?))
    }

    pub async fn read(&self) -> Result<Config, ConfigError> {
        let mut file = self.get_file()?;
        file.rewind().await?;

        let mut content = vec![];
        file.read_to_end(&mut content).await?;

        if content.is_empty() {
            return Ok(Config::default());
        }

        let content = str::from_utf8(&content)?;
        Ok(serde_json::from_str(content)?)
    }

    pub async fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let mut file = self.get_file()?;
        info!("Saving config");

        let content = serde_json::to_string_pretty(config)?;
        file.rewind().await?;
        file.set_len(0).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("ble-motor-remote-test-{}", std::process::id()))
            .join(name)
    }

    #[tokio::test]
    async fn empty_file_reads_as_default() {
        let path = temp_path("empty.json");
        let _ = std::fs::remove_file(&path);

        let io = ConfigIO::open_sync(&path).unwrap();
        assert_eq!(io.read().await.unwrap(), Config::default());
    }

    #[tokio::test]
    async fn save_then_read() {
        let path = temp_path("saved.json");
        let _ = std::fs::remove_file(&path);
        let io = ConfigIO::open_sync(&path).unwrap();

        let config = Config { target_name: "ROVER".to_string(), scan_timeout_ms: 3000 };
        io.save(&config).await.unwrap();
        // a shorter document must not leave trailing bytes of the previous one
        let shorter = Config { target_name: "R".to_string(), scan_timeout_ms: 1 };
        io.save(&shorter).await.unwrap();

        assert_eq!(io.read().await.unwrap(), shorter);
    }

    #[tokio::test]
    async fn invalid_json_is_an_error() {
        let path = temp_path("invalid.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let io = ConfigIO::open_sync(&path).unwrap();
        assert!(matches!(io.read().await, Err(ConfigError::JsonError { .. })));
    }
}
