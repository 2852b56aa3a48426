use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::lock::LockPatience;
use crate::writer::{VersionMode, WriterOptions};

/// Name of the lock file placed in the database directory by default.
pub const DEFAULT_LOCK_FILE: &str = ".dbswap.lock";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot resolve config directory: {0}")]
    Xdg(#[from] xdg::BaseDirectoriesError),

    #[error("config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("cannot serialize default config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Global configuration loaded from `~/.config/dbswap/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbswapConfig {
    /// Directory holding the database files.
    pub database_directory: PathBuf,
    /// Lock file serializing writers. Defaults to `<database_directory>/.dbswap.lock`.
    #[serde(default)]
    pub lock_file: Option<PathBuf>,
    /// "versioned" (timestamped files plus a stable symlink) or "unversioned".
    #[serde(default)]
    pub versioning: VersionMode,
    /// How long to wait for another writer: `mode = "block" | "fail-fast" | "timeout"`.
    #[serde(default)]
    pub lock: LockPatience,
}

impl Default for DbswapConfig {
    fn default() -> Self {
        Self {
            database_directory: PathBuf::from("/usr/share/GeoIP"),
            lock_file: None,
            versioning: VersionMode::Versioned,
            lock: LockPatience::Block,
        }
    }
}

impl DbswapConfig {
    /// Effective lock file path.
    pub fn lock_path(&self) -> PathBuf {
        self.lock_file
            .clone()
            .unwrap_or_else(|| self.database_directory.join(DEFAULT_LOCK_FILE))
    }

    pub fn writer_options(&self) -> WriterOptions {
        WriterOptions {
            lock_patience: self.lock,
            version_mode: self.versioning,
        }
    }
}

pub fn config_path() -> Result<PathBuf, ConfigError> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("dbswap")?;
    xdg_dirs
        .place_config_file("config.toml")
        .map_err(|source| ConfigError::Io {
            path: xdg_dirs.get_config_home(),
            source,
        })
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<DbswapConfig, ConfigError> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = DbswapConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        let io_err = |source| ConfigError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(&path, toml).map_err(io_err)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    load_from(&path)
}

/// Load configuration from an explicit file.
pub fn load_from(path: &Path) -> Result<DbswapConfig, ConfigError> {
    let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&data).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
