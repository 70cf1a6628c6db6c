//! Configuration module for keyhop.
//!
//! Handles loading and parsing the `~/.keyhop/keyhoprc` settings file.

pub mod platform;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::logging::LogConfig;
use crate::ssh::agent::DEFAULT_AGENT_PROGRAM;
use crate::ssh::keygen::{KeyAlgorithm, DEFAULT_KEYGEN_PROGRAM};
use crate::ssh::{ConfigFile, IdentityRegistry};

pub use platform::{expand_home, home_dir, keyhop_dir, ssh_dir};

/// Errors from reading the settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Default user for Git hosting aliases.
pub const DEFAULT_USER: &str = "git";

/// Default keyhoprc file content with all settings documented.
const DEFAULT_KEYHOPRC: &str = r#"# keyhop configuration file
# =========================
# Lines starting with '#' are comments. Paths may start with '~'.
#
# Files
# -----
# ssh_config = ~/.ssh/config              # OpenSSH client config to manage
# key_dir = ~/.ssh                         # Where generated keys are written
# registry = ~/.keyhop/identities.toml     # Known identities

# Programs
# --------
# keygen_program = ssh-keygen
# agent_program = ssh-add

# Defaults
# --------
# default_algorithm = ed25519              # ed25519, ecdsa or rsa
# default_user = git                       # User for new host aliases

# Logging Configuration
# ---------------------
# Logs are stored in ~/.keyhop/logs/ with automatic cleanup.
#
# log_enabled = true       # Enable/disable file logging (true/false)
# log_level = info         # Log level: trace, debug, info, warn, error, off
# log_retention = 24       # Hours to keep log files (default: 24)
"#;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// OpenSSH client config file.
    pub ssh_config: PathBuf,
    /// Directory for generated key pairs.
    pub key_dir: PathBuf,
    /// Identity registry file.
    pub registry: PathBuf,
    /// Key generation program.
    pub keygen_program: PathBuf,
    /// Agent client program.
    pub agent_program: PathBuf,
    /// Algorithm used when none is given.
    pub default_algorithm: KeyAlgorithm,
    /// `User` written for new host aliases when none is given.
    pub default_user: String,
    /// Path to the settings file.
    pub config_path: PathBuf,
    /// Logging configuration.
    pub log_config: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ssh_config: ConfigFile::default_path(),
            key_dir: ssh_dir(),
            registry: IdentityRegistry::default_path(),
            keygen_program: PathBuf::from(DEFAULT_KEYGEN_PROGRAM),
            agent_program: PathBuf::from(DEFAULT_AGENT_PROGRAM),
            default_algorithm: KeyAlgorithm::default(),
            default_user: DEFAULT_USER.to_string(),
            config_path: Self::default_config_path(),
            log_config: LogConfig::default(),
        }
    }
}

impl Config {
    /// Returns the default settings path (~/.keyhop/keyhoprc).
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        keyhop_dir().join("keyhoprc")
    }

    /// Loads configuration from the default path, creating it if it doesn't exist.
    ///
    /// # Errors
    /// Returns error if config cannot be read.
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from(&Self::default_config_path())
    }

    /// Loads configuration from a specific path.
    ///
    /// # Errors
    /// Returns error if config cannot be read.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let io_error = |source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        };

        // Create default config if it doesn't exist
        if !path.exists() {
            Self::create_default_config(path).map_err(io_error)?;
        }

        let content = fs::read_to_string(path).map_err(io_error)?;
        let mut config = Self {
            config_path: path.to_path_buf(),
            ..Self::default()
        };
        config.parse(&content);
        Ok(config)
    }

    /// Creates the default settings file.
    fn create_default_config(path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(path)?;
        file.write_all(DEFAULT_KEYHOPRC.as_bytes())?;
        Ok(())
    }

    /// Parses the settings file content.
    pub fn parse(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();

            // Skip comments and empty lines
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            // Parse key = value
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim();

                // Remove inline comments
                let value = value.split('#').next().unwrap_or(value).trim();

                self.apply_setting(key, value);
            }
        }
    }

    /// Applies a single setting.
    fn apply_setting(&mut self, key: &str, value: &str) {
        match key {
            "ssh_config" => self.ssh_config = expand_home(value),
            "key_dir" => self.key_dir = expand_home(value),
            "registry" => self.registry = expand_home(value),
            "keygen_program" => self.keygen_program = expand_home(value),
            "agent_program" => self.agent_program = expand_home(value),
            "default_algorithm" => match KeyAlgorithm::parse(value) {
                Some(algorithm) => self.default_algorithm = algorithm,
                None => tracing::warn!("ignoring unknown default_algorithm '{}'", value),
            },
            "default_user" => {
                if !value.is_empty() {
                    self.default_user = value.to_string();
                }
            }
            "log_level" => {
                self.log_config.level = LogConfig::parse_level(value);
            }
            "log_retention" | "log_retention_hours" => {
                self.log_config.retention_hours = LogConfig::parse_retention(value);
            }
            "log_enabled" | "logging" => {
                self.log_config.enabled =
                    matches!(value.to_lowercase().as_str(), "true" | "yes" | "1" | "on");
            }
            _ => tracing::debug!("ignoring unknown setting '{}'", key),
        }
    }
}
