//! Store configuration.
//!
//! ```toml
//! directory = "/var/lib/app/depot"
//! extension = "sqlite"
//! busy_timeout_ms = 5000
//! create_directory = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DepotError, Result};

pub const DEFAULT_EXTENSION: &str = "sqlite";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding one store file per entity kind.
    pub directory: PathBuf,
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Create `directory` on open when it is missing.
    #[serde(default = "default_create_directory")]
    pub create_directory: bool,
}

fn default_extension() -> String {
    DEFAULT_EXTENSION.to_string()
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

fn default_create_directory() -> bool {
    true
}

impl StoreConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            extension: default_extension(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            create_directory: true,
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_create_directory(mut self, create: bool) -> Self {
        self.create_directory = create;
        self
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

pub fn read_config(path: &Path) -> Result<StoreConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| DepotError::Config(format!("Failed to read config {}: {}", path.display(), e)))?;
    toml::from_str(&contents)
        .map_err(|e| DepotError::Config(format!("Failed to parse config {}: {}", path.display(), e)))
}

pub fn write_config(path: &Path, config: &StoreConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            DepotError::Config(format!(
                "Failed to create config directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }
    let contents = toml::to_string_pretty(config)
        .map_err(|e| DepotError::Config(format!("TOML error: {}", e)))?;
    std::fs::write(path, contents)
        .map_err(|e| DepotError::Config(format!("Failed to write config {}: {}", path.display(), e)))?;
    Ok(())
}
