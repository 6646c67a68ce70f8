//! Configuration management for ferrysh.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/ferrysh/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("chunk_size must be between 1 and {max}, got {got}")]
    InvalidChunkSize {
        /// Configured value.
        got: u32,
        /// Upper bound derived from the frame size limit.
        max: u32,
    },
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Upper bound for the transfer chunk size: a sealed chunk plus message
/// and frame overhead must fit one frame.
pub const MAX_CHUNK_SIZE: u32 = 512 * 1024;

/// Main configuration structure for ferrysh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General shell configuration.
    pub shell: ShellConfig,

    /// Remote session configuration.
    pub session: SessionConfig,

    /// File transfer configuration.
    pub transfer: TransferConfig,

    /// Security settings.
    pub security: SecurityConfig,
}

/// General shell configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShellConfig {
    /// Directory for shell data (log files).
    pub data_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Remote session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Port used by `host` when none is given on the command.
    pub default_port: u16,
}

/// File transfer configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransferConfig {
    /// Plaintext bytes per transfer chunk.
    pub chunk_size: u32,

    /// Overwrite existing destinations without prompting.
    pub overwrite: bool,
}

/// Security settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SecurityConfig {
    /// Shared transfer passphrase; both peers must configure the same one.
    /// When unset, transfers are sent in the clear.
    pub passphrase: Option<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { default_port: 4815 }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: protocol::TRANSFER_CHUNK_SIZE as u32,
            overwrite: false,
        }
    }
}

impl Config {
    /// Load configuration from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from the default path, falling back to defaults
    /// when no file exists.
    pub fn load_default() -> Result<Self> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the given path, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config directory: {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment variable overrides.
    ///
    /// `FERRYSH_LOG_LEVEL`, `FERRYSH_PORT` and `FERRYSH_PASSPHRASE`
    /// override their configuration-file counterparts.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("FERRYSH_LOG_LEVEL") {
            self.shell.log_level = level;
        }
        if let Ok(port) = std::env::var("FERRYSH_PORT") {
            if let Ok(port) = port.parse() {
                self.session.default_port = port;
            }
        }
        if let Ok(passphrase) = std::env::var("FERRYSH_PASSPHRASE") {
            self.security.passphrase = Some(passphrase);
        }
    }

    /// Validate the configuration, returning the first violation found.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !VALID_LOG_LEVELS.contains(&self.shell.log_level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.shell.log_level.clone()));
        }
        if self.transfer.chunk_size == 0 || self.transfer.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::InvalidChunkSize {
                got: self.transfer.chunk_size,
                max: MAX_CHUNK_SIZE,
            });
        }
        Ok(())
    }
}

/// The default configuration file path: `~/.config/ferrysh/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ferrysh")
        .join("config.toml")
}

/// The default data directory: `~/.local/share/ferrysh` (platform
/// equivalent).
fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ferrysh")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.shell.log_level, "info");
        assert_eq!(config.session.default_port, 4815);
        assert_eq!(
            config.transfer.chunk_size,
            protocol::TRANSFER_CHUNK_SIZE as u32
        );
        assert!(!config.transfer.overwrite);
        assert!(config.security.passphrase.is_none());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.session.default_port = 9000;
        config.transfer.overwrite = true;
        config.security.passphrase = Some("swordfish".to_string());

        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let result = Config::load(&temp_dir.path().join("nope.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[session]\ndefault_port = 2222\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.session.default_port, 2222);
        assert_eq!(config.shell.log_level, "info");
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut config = Config::default();
        config.shell.log_level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }

    #[test]
    fn test_invalid_chunk_size_rejected() {
        let mut config = Config::default();
        config.transfer.chunk_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidChunkSize { got: 0, .. })
        ));

        config.transfer.chunk_size = MAX_CHUNK_SIZE + 1;
        assert!(config.validate().is_err());

        config.transfer.chunk_size = MAX_CHUNK_SIZE;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_garbage_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "not toml at all {{{").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
