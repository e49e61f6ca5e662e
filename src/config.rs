//! Service configuration
//!
//! One TOML document, every section optional:
//!
//! ```toml
//! startup_pulse_ms = 0
//!
//! [logging]
//! level = "info"
//!
//! [playback]
//! settle_delay_ms = 5
//! composite_chunk_size = 128
//!
//! [policy]
//! ringer_mode = "normal"
//! feedback_enabled = true
//!
//! [[devices]]
//! device_id = 1
//! device_name = "builtin"
//! is_local = true
//! vibrators = [{ vibrator_id = 1 }]
//! ```
//!
//! Lookup order: explicit path, then `<config dir>/vibratord/config.toml`.
//! A missing file yields the defaults.

use crate::hal::DeviceDescriptor;
use crate::model::RequestLimits;
use crate::playback::PlaybackTiming;
use crate::policy::PolicySnapshot;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, Level};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("No config directory available on this system")]
    NoConfigDir,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
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
    pub fn max_level(&self) -> Level {
        Level::from_str(&self.level).unwrap_or(Level::INFO)
    }
}

/// Complete daemon configuration, one TOML file
///
/// Every section is optional. A missing file or section falls back to
/// defaults, while a file that does not parse is an error.
///
/// # Examples
///
/// ```rust
/// use vibratord::ServiceConfig;
///
/// let config = ServiceConfig::from_toml_str(
///     r#"
/// startup_pulse_ms = 50
///
/// [logging]
/// level = "debug"
///
/// [playback]
/// settle_delay_ms = 10
///
/// [policy]
/// do_not_disturb = true
/// "#,
/// )
/// .unwrap();
///
/// assert_eq!(config.startup_pulse_ms, 50);
/// assert_eq!(config.playback.settle_delay_ms, 10);
/// // untouched keys keep their defaults
/// assert_eq!(config.playback.stop_retry_count, 10);
/// assert!(config.devices.is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Length of the pulse played once after start-up, 0 disables it
    pub startup_pulse_ms: u32,
    pub logging: LoggingConfig,
    pub playback: PlaybackTiming,
    pub limits: RequestLimits,
    /// Initial policy values, later updated by the settings subscription
    pub policy: PolicySnapshot,
    /// Devices of the simulated HAL
    pub devices: Vec<DeviceDescriptor>,
}

impl ServiceConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("vibratord").join("config.toml"))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Loads `path`, or the default location when `None`
    pub async fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path().ok_or(ConfigError::NoConfigDir)?,
        };

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Writes the default configuration to `path`, creating parent directories
    pub async fn write_default(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ConfigError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let content = Self::default().to_toml()?;
        tokio::fs::write(path, content)
            .await
            .map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        info!("Default config written to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::RingerMode;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = ServiceConfig::from_toml_str(
            r#"
            [playback]
            settle_delay_ms = 20

            [policy]
            ringer_mode = "silent"
            input_method_apps = ["com.example.keyboard"]
            "#,
        )
        .unwrap();

        assert_eq!(config.playback.settle_delay_ms, 20);
        assert_eq!(config.playback.composite_chunk_size, 128);
        assert_eq!(config.policy.ringer_mode, RingerMode::Silent);
        assert!(config.policy.feedback_enabled);
        assert_eq!(config.limits, RequestLimits::default());
    }

    #[test]
    fn test_devices_section() {
        let config = ServiceConfig::from_toml_str(
            r#"
            [[devices]]
            device_id = 1
            device_name = "builtin"
            is_local = true
            vibrators = [{ vibrator_id = 1, position = 1 }, { vibrator_id = 2, position = 2 }]
            capability = { supports_hd_streaming = true }
            "#,
        )
        .unwrap();

        let device = &config.devices[0];
        assert_eq!(device.vibrators.len(), 2);
        assert!(device.capability.supports_hd_streaming);
        assert!(!device.capability.supports_time_delay_composite);
    }

    #[test]
    fn test_log_level_fallback() {
        let logging = LoggingConfig {
            level: "chatty".to_string(),
        };
        assert_eq!(logging.max_level(), Level::INFO);
        let logging = LoggingConfig {
            level: "debug".to_string(),
        };
        assert_eq!(logging.max_level(), Level::DEBUG);
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig::load(Some(&dir.path().join("absent.toml")))
            .await
            .unwrap();
        assert_eq!(config, ServiceConfig::default());
    }

    #[tokio::test]
    async fn test_written_default_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        ServiceConfig::write_default(&path).await.unwrap();

        let config = ServiceConfig::load(Some(&path)).await.unwrap();
        assert_eq!(config, ServiceConfig::default());
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "startup_pulse_ms = \"soon\"").await.unwrap();
        assert!(matches!(
            ServiceConfig::load(Some(&path)).await,
            Err(ConfigError::Parse(_))
        ));
    }
}
