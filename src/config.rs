//! Configuration for sandterm.
//!
//! This module provides TOML configuration loading from
//! `~/.sandterm/config.toml`. Every section is optional; missing keys fall
//! back to the defaults below.
//!
//! # Configuration File
//!
//! ```toml
//! [runtime]
//! preload_packages = ["micropip"]
//! builtin_modules = ["sys", "os", "math", "json", "random", "time"]
//!
//! [terminal]
//! echo_prefix = "> "
//! session_markers = true
//! boot_banner = "Unstoppable Resilience Layer Active."
//! monospace_hint = true
//!
//! [resilience]
//! enabled = true
//! advisory_prefix = "RESILIENCE NOTE"
//! disabled_operations = []
//!
//! [logging]
//! level = "info"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config")]
    Parse(#[source] toml::de::Error),

    #[error("Failed to serialize config")]
    Serialize(#[source] toml::ser::Error),

    #[error("Failed to write config {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not determine config path")]
    NoHome,
}

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub runtime: RuntimeConfig,
    pub terminal: TerminalConfig,
    pub resilience: ResilienceConfig,
    pub logging: LoggingConfig,
}

/// Embedded runtime settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Packages loaded during boot
    pub preload_packages: Vec<String>,
    /// Modules importable without installation
    pub builtin_modules: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            preload_packages: vec!["micropip".to_string()],
            builtin_modules: ["sys", "os", "math", "json", "random", "time", "subprocess", "multiprocessing"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Terminal presentation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Prefix shown before echoed user input
    pub echo_prefix: String,
    /// Print start/finish markers around editor runs
    pub session_markers: bool,
    /// System line written once the runtime has booted
    pub boot_banner: String,
    /// Tag table-like output lines for fixed-width rendering
    pub monospace_hint: bool,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            echo_prefix: "> ".to_string(),
            session_markers: true,
            boot_banner: "Unstoppable Resilience Layer Active.".to_string(),
            monospace_hint: true,
        }
    }
}

/// Interception policy settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub enabled: bool,
    pub advisory_prefix: String,
    /// Operation names left to fail natively
    pub disabled_operations: Vec<String>,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            advisory_prefix: "RESILIENCE NOTE".to_string(),
            disabled_operations: Vec::new(),
        }
    }
}

/// Log settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. "info" or "sandterm=debug"
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, falling back to defaults
    pub fn load() -> Self {
        match Self::get_config_path() {
            Some(path) if path.exists() => Self::load_from(&path).unwrap_or_else(|e| {
                tracing::warn!("Ignoring config {}: {}", path.display(), e);
                Self::default()
            }),
            _ => Self::default(),
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse configuration text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::get_config_path().ok_or(ConfigError::NoHome)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        fs::write(&path, content).map_err(|source| ConfigError::Write { path, source })
    }

    /// Directory holding config and logs
    pub fn data_dir() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".sandterm"))
    }

    fn get_config_path() -> Option<PathBuf> {
        Self::data_dir().map(|dir| dir.join("config.toml"))
    }
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.resilience.enabled);
        assert_eq!(config.terminal.echo_prefix, "> ");
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::parse(
            r#"
            [terminal]
            session_markers = false

            [resilience]
            disabled_operations = ["os.system"]
            "#,
        )
        .unwrap();
        assert!(!config.terminal.session_markers);
        assert_eq!(config.terminal.boot_banner, TerminalConfig::default().boot_banner);
        assert_eq!(config.resilience.disabled_operations, vec!["os.system"]);
        assert_eq!(config.resilience.advisory_prefix, "RESILIENCE NOTE");
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        assert!(matches!(
            Config::parse("[terminal]\nsession_markers = \"yes\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = Config::default();
        config.logging.level = "debug".to_string();
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(Config::parse(&text).unwrap(), config);
    }
}
