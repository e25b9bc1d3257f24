//! Store and logging configuration.
//!
//! # Responsibility
//! - Load `StoreConfig` from TOML with environment overrides.
//! - Translate the database section into `DatabaseOptions`.
//!
//! # Invariants
//! - Missing sections and keys fall back to defaults.
//! - Environment overrides always win over file values.

use crate::db::DatabaseOptions;
use log::{info, warn};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const CONFIG_PATHS: &[&str] = &["forum.toml", "./config/forum.toml"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file `{}`: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
    pub foreign_keys: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("forum.sqlite3"),
            busy_timeout_ms: 5_000,
            foreign_keys: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Absolute directory for rolling log files. Logging stays off when unset.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: crate::logging::default_log_level().to_string(),
            dir: None,
        }
    }
}

impl StoreConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn to_database_options(&self) -> DatabaseOptions {
        DatabaseOptions {
            busy_timeout: Duration::from_millis(self.database.busy_timeout_ms),
            foreign_keys: self.database.foreign_keys,
        }
    }
}

/// Resolves the config file and applies `FORUM_*` overrides.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Defaults, then the first config file found, then environment.
    pub fn load(&self) -> Result<StoreConfig, ConfigError> {
        let mut config = match self.find_config_file() {
            Some(path) => {
                let config = StoreConfig::from_file(&path)?;
                info!(
                    "event=config_load module=config status=ok source=file path={}",
                    path.display()
                );
                config
            }
            None => {
                info!("event=config_load module=config status=ok source=defaults");
                StoreConfig::default()
            }
        };
        apply_env_overrides(&mut config, |key| env::var(key).ok());
        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("FORUM_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

fn apply_env_overrides(config: &mut StoreConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(path) = lookup("FORUM_DB_PATH") {
        config.database.path = PathBuf::from(path);
    }
    if let Some(raw) = lookup("FORUM_DB_BUSY_TIMEOUT_MS") {
        match raw.trim().parse() {
            Ok(timeout) => config.database.busy_timeout_ms = timeout,
            Err(_) => warn!(
                "event=config_load module=config status=error key=FORUM_DB_BUSY_TIMEOUT_MS reason=not_an_integer"
            ),
        }
    }
    if let Some(level) = lookup("FORUM_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(dir) = lookup("FORUM_LOG_DIR") {
        config.logging.dir = Some(PathBuf::from(dir));
    }
}

#[cfg(test)]
mod tests {
    use super::{apply_env_overrides, ConfigError, ConfigLoader, StoreConfig};
    use std::collections::HashMap;
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let config = StoreConfig::from_toml_str(
            r#"
            [database]
            path = "/var/lib/forum/forum.sqlite3"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.database.path,
            PathBuf::from("/var/lib/forum/forum.sqlite3")
        );
        assert_eq!(config.database.busy_timeout_ms, 5_000);
        assert!(config.database.foreign_keys);
        assert!(config.logging.dir.is_none());
    }

    #[test]
    fn env_overrides_win_and_bad_numbers_are_ignored() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("FORUM_DB_PATH", "/tmp/override.sqlite3"),
            ("FORUM_DB_BUSY_TIMEOUT_MS", "soon"),
            ("FORUM_LOG_LEVEL", "warn"),
        ]);
        let mut config = StoreConfig::default();
        apply_env_overrides(&mut config, |key| env.get(key).map(|value| value.to_string()));

        assert_eq!(config.database.path, PathBuf::from("/tmp/override.sqlite3"));
        assert_eq!(config.database.busy_timeout_ms, 5_000);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn explicit_path_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[database]\nbusy_timeout_ms = 250\nforeign_keys = false\n\n[logging]\nlevel = \"error\""
        )
        .unwrap();

        let config = ConfigLoader::with_path(file.path()).load().unwrap();
        let options = config.to_database_options();
        assert_eq!(options.busy_timeout, Duration::from_millis(250));
        assert!(!options.foreign_keys);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[database\npath = 1").unwrap();
        let err = StoreConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
