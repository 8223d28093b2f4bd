//! Runtime configuration for a cache instance.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An error reading or parsing a [`CacheConfig`] file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to open config file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Configuration for one [`SharedSubResourceCache`] instance.
///
/// [`SharedSubResourceCache`]: crate::SharedSubResourceCache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether completed loads are stored for reuse.
    ///
    /// When disabled, the cache still coalesces concurrent requests for the
    /// same key, but `insert` becomes a no-op and every lookup of a
    /// finished resource misses.
    pub enabled: bool,

    /// An upper bound on how long complete entries stay fresh.
    ///
    /// Applied on insertion: the entry expires at the earlier of its own
    /// expiration time and now plus this duration. `None` leaves the
    /// entry's own expiration untouched.
    #[serde(with = "humantime_serde")]
    pub default_expiration: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_expiration: None,
        }
    }
}

impl CacheConfig {
    /// Reads a configuration from a YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }
}
