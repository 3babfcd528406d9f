//! Configuration for golook
//!
//! Values come from built-in defaults, then an optional TOML file, then
//! `GOLOOK_*` environment variables.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;

use crate::data::keys::DEFAULT_KEYS_FRESHNESS_SECS;
use crate::data::links::{DEFAULT_LINKS_FRESHNESS_SECS, DEFAULT_LINKS_URL};
use crate::icons::DEFAULT_RETRY_COOLDOWN_HOURS;

/// Default source of published authorized keys
pub const DEFAULT_KEYS_URL: &str = "https://git.io/heilek";

const CONFIG_FILE: &str = "config.toml";

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Settings for one remote dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Endpoint serving the dataset
    pub url: String,
    /// Freshness window in seconds
    pub freshness_secs: i64,
}

/// Icon prefetch settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IconConfig {
    pub enabled: bool,
    pub cooldown_hours: i64,
}

impl Default for IconConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_hours: DEFAULT_RETRY_COOLDOWN_HOURS,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn level(&self) -> Level {
        self.level.parse().unwrap_or(Level::INFO)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory for datasets; defaults to the platform data dir
    pub data_dir: Option<PathBuf>,
    /// Directory for icons, markers and job files; defaults to the platform cache dir
    pub cache_dir: Option<PathBuf>,
    pub links: SourceConfig,
    pub keys: SourceConfig,
    pub icons: IconConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            cache_dir: None,
            links: SourceConfig {
                url: DEFAULT_LINKS_URL.to_string(),
                freshness_secs: DEFAULT_LINKS_FRESHNESS_SECS,
            },
            keys: SourceConfig {
                url: DEFAULT_KEYS_URL.to_string(),
                freshness_secs: DEFAULT_KEYS_FRESHNESS_SECS,
            },
            icons: IconConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "golook")
}

impl Config {
    /// Loads configuration.
    ///
    /// An explicit `path` must exist. Without one, `<config_dir>/config.toml` is
    /// read when present. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE)) {
                Some(default_path) if default_path.is_file() => Self::from_file(&default_path)?,
                _ => Self::default(),
            },
        };

        config.apply_overrides(|name| env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Applies `GOLOOK_*` overrides looked up through `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("GOLOOK_LINKS_URL") {
            self.links.url = url;
        }
        if let Some(url) = lookup("GOLOOK_KEYS_URL") {
            self.keys.url = url;
        }
        if let Some(dir) = lookup("GOLOOK_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = lookup("GOLOOK_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(level) = lookup("GOLOOK_LOG") {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, source) in [("links", &self.links), ("keys", &self.keys)] {
            if source.url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{name}.url must not be empty")));
            }
            if source.freshness_secs < 0 {
                return Err(ConfigError::Invalid(format!(
                    "{name}.freshness_secs must not be negative"
                )));
            }
        }
        if self.icons.cooldown_hours < 0 {
            return Err(ConfigError::Invalid(
                "icons.cooldown_hours must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolved data directory
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.data_dir
            .clone()
            .or_else(|| project_dirs().map(|dirs| dirs.data_dir().to_path_buf()))
    }

    /// Resolved cache directory
    pub fn cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir
            .clone()
            .or_else(|| project_dirs().map(|dirs| dirs.cache_dir().to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_dataset_windows() {
        let config = Config::default();
        assert_eq!(config.links.freshness_secs, 5);
        assert_eq!(config.keys.freshness_secs, 86_400);
        assert_eq!(config.links.url, "http://go/.export");
        assert!(config.icons.enabled);
        assert_eq!(config.icons.cooldown_hours, 24);
        assert_eq!(config.logging.level(), Level::INFO);
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
            cache_dir = "/tmp/golook-cache"

            [keys]
            url = "https://keys.example.com/authorized_keys"
            freshness_secs = 3600

            [icons]
            enabled = false
            "#,
        )
        .expect("config should parse");

        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/golook-cache")));
        assert_eq!(config.keys.freshness_secs, 3600);
        assert_eq!(config.links, Config::default().links);
        assert!(!config.icons.enabled);
        assert_eq!(config.icons.cooldown_hours, 24);
    }

    #[test]
    fn test_environment_overrides_win() {
        let vars: HashMap<&str, &str> = [
            ("GOLOOK_LINKS_URL", "http://links.test/.export"),
            ("GOLOOK_CACHE_DIR", "/var/cache/golook"),
            ("GOLOOK_LOG", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.links.url, "http://links.test/.export");
        assert_eq!(config.cache_dir(), Some(PathBuf::from("/var/cache/golook")));
        assert_eq!(config.logging.level(), Level::DEBUG);
        assert_eq!(config.keys.url, DEFAULT_KEYS_URL);
    }

    #[test]
    fn test_unknown_log_level_falls_back_to_info() {
        let logging = LoggingConfig {
            level: "chatty".to_string(),
        };
        assert_eq!(logging.level(), Level::INFO);
    }

    #[test]
    fn test_validate_rejects_negative_window() {
        let mut config = Config::default();
        config.links.freshness_secs = -1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = Config::load(Some(&temp_dir.path().join("absent.toml")));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_invalid_toml_reports_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "links = [").unwrap();

        let err = Config::from_file(&path).unwrap_err();

        assert!(err.to_string().contains("config.toml"));
    }
}
