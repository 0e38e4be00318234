//! Daemon configuration.
//!
//! Values come from an optional TOML file and are then overridden by
//! environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use eye_engine::EngineConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "beholder-eye.toml";

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "BEHOLDER_EYE_CONFIG";

/// Environment variable overriding `nexus_url`.
pub const NEXUS_URL_ENV: &str = "BEHOLDER_NEXUS_URL";

/// Environment variable overriding `redis_url`.
pub const REDIS_URL_ENV: &str = "BEHOLDER_REDIS_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EyeConfig {
    /// Hub address, `tcp://host:port`.
    pub nexus_url: String,

    /// Cache address, `redis://host[:port]/`.
    pub redis_url: String,

    pub acquire_timeout_ms: u64,

    pub thumbnail_ttl_secs: u64,

    pub snapshot_ttl_secs: u64,

    pub default_alignment_pixel_size: u32,

    /// Seconds between observation stats log lines.
    pub stats_interval_secs: u64,

    /// Still images replayed instead of a live output.
    ///
    /// Required where no desktop duplication backend exists.
    pub replay_images: Vec<PathBuf>,
}

impl Default for EyeConfig {
    fn default() -> Self {
        Self {
            nexus_url: "tcp://127.0.0.1:5110".to_string(),
            redis_url: "redis://127.0.0.1/".to_string(),
            acquire_timeout_ms: 100,
            thumbnail_ttl_secs: 30,
            snapshot_ttl_secs: 7200,
            default_alignment_pixel_size: 2,
            stats_interval_secs: 5,
            replay_images: Vec::new(),
        }
    }
}

impl EyeConfig {
    /// Load from the config file (if any), then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_file(path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override URLs from variables; empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(NEXUS_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.nexus_url = url;
        }
        if let Some(url) = lookup(REDIS_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.redis_url = url;
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
            thumbnail_ttl: Duration::from_secs(self.thumbnail_ttl_secs),
            snapshot_ttl: Duration::from_secs(self.snapshot_ttl_secs),
            default_alignment_pixel_size: self.default_alignment_pixel_size,
            stats_interval: Duration::from_secs(self.stats_interval_secs),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "nexus_url = \"tcp://hub:7000\"\nsnapshot_ttl_secs = 60\nstats_interval_secs = 30").unwrap();

        let config = EyeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.nexus_url, "tcp://hub:7000");
        assert_eq!(config.snapshot_ttl_secs, 60);
        assert_eq!(config.engine_config().stats_interval, Duration::from_secs(30));
        assert_eq!(config.redis_url, "redis://127.0.0.1/");
        assert_eq!(config.acquire_timeout_ms, 100);
    }

    #[test]
    fn test_invalid_file_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "acquire_timeout_ms = \"soon\"").unwrap();

        assert!(matches!(
            EyeConfig::from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            EyeConfig::from_file(Path::new("/nonexistent/beholder-eye.toml")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_environment_overrides() {
        let mut config = EyeConfig::default();
        config.apply_overrides(|name| match name {
            NEXUS_URL_ENV => Some("tcp://nexus:5000".to_string()),
            REDIS_URL_ENV => Some("  ".to_string()),
            _ => None,
        });

        assert_eq!(config.nexus_url, "tcp://nexus:5000");
        assert_eq!(config.redis_url, "redis://127.0.0.1/");
    }

    #[test]
    fn test_engine_config() {
        let engine = EyeConfig::default().engine_config();
        assert_eq!(engine.acquire_timeout, Duration::from_millis(100));
        assert_eq!(engine.thumbnail_ttl, Duration::from_secs(30));
        assert_eq!(engine.snapshot_ttl, Duration::from_secs(7200));
        assert_eq!(engine.default_alignment_pixel_size, 2);
        assert_eq!(engine.stats_interval, Duration::from_secs(5));
    }
}
