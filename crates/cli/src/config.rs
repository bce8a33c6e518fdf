use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

/// Main configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Server host used when none is given on the command line
    pub host: Option<String>,

    /// Server port used when none is given on the command line
    pub port: Option<u16>,

    /// Seconds to wait for the TCP connection
    pub connect_timeout_secs: Option<u64>,

    /// Seconds to wait for any single reply
    pub read_timeout_secs: Option<u64>,

    /// Deepest prediction walk to follow before giving up
    pub max_turns: Option<usize>,
}

impl Config {
    /// Load config from default location (~/.config/regtree/config.toml)
    pub fn load() -> Self {
        Self::config_path()
            .filter(|path| path.exists())
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    /// Load config from `path`, falling back to defaults if it is missing or invalid
    pub fn load_from(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), "Cannot read config: {e}");
                return Self::default();
            }
        };
        match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), "Ignoring invalid config: {e}");
                Self::default()
            }
        }
    }

    /// Get config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("regtree/config.toml"))
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs.map(Duration::from_secs)
    }
}
