//! Engine configuration.
//!
//! Only two knobs exist: how often the daemon refreshes the active session
//! and how many days the daily report covers. Both default when absent.
//!
//! The file is TOML, found at `$LTM_CONFIG` or `<config_dir>/ltm/config.toml`.
//! A missing file is not an error.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "LTM_CONFIG";

/// Default seconds between polls of the active session.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Default number of trailing days in the daily report.
pub const DEFAULT_DAY_WINDOW: u32 = 7;

/// Largest accepted day window.
pub const MAX_DAY_WINDOW: u32 = ltm_core::MAX_DAY_COUNT;

/// Errors loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds between refreshes of the active session (minimum 1).
    pub poll_interval_secs: u64,
    /// Days covered by the daily report (1..=365).
    pub day_window: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            day_window: DEFAULT_DAY_WINDOW,
        }
    }
}

impl Config {
    /// Loads the configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Loads the configuration from `path`; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        Self::parse(&contents)
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Parses TOML text and clamps the values into range.
    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        let config: Self = toml::from_str(contents)?;
        Ok(config.clamped())
    }

    /// Returns a copy with every value forced into its valid range.
    pub fn clamped(self) -> Self {
        Self {
            poll_interval_secs: self.poll_interval_secs.max(1),
            day_window: self.day_window.clamp(1, MAX_DAY_WINDOW),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

/// Resolves the config file path.
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("ltm").join("config.toml"))
}
