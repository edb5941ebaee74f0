use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::session::validate_node_id;
use crate::transport::BusSettings;

/// Persisted browser settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Driver kind, `socketcan` or `virtual`
    pub interface: String,
    pub channel: String,
    pub bitrate_kbps: u32,
    pub node_id: u8,
    pub eds_file_path: Option<String>,
    pub sdo_timeout_ms: u64,
    pub enable_logging: bool,
    pub log_directory: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            interface: "socketcan".to_string(),
            channel: "can0".to_string(),
            bitrate_kbps: 500,
            node_id: 1,
            eds_file_path: None,
            sdo_timeout_ms: 1000,
            enable_logging: false,
            log_directory: None,
        }
    }
}

impl BrowserConfig {
    /// Get the path to the config file
    pub fn config_file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "canopen", "canopen-browser")
            .map(|proj_dirs| proj_dirs.config_dir().join("config.toml"))
    }

    /// Load configuration from the platform config file, returns default if it is missing or broken
    pub fn load() -> Self {
        let Some(config_path) = Self::config_file_path() else {
            return Self::default();
        };
        if !config_path.exists() {
            return Self::default();
        }

        match Self::load_from(&config_path) {
            Ok(config) => {
                info!(path = ?config_path, "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(path = ?config_path, error = %e, "Using default configuration");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        validate_node_id(config.node_id)?;
        Ok(config)
    }

    /// Save configuration to the platform config file
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_file_path().ok_or(ConfigError::NoConfigDirectory)?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let toml_string = toml::to_string_pretty(self)?;
        fs::write(path, toml_string)?;
        info!(path = ?path, "Saved configuration");
        Ok(())
    }

    pub fn bus_settings(&self) -> BusSettings {
        BusSettings::from_kbps(&self.interface, &self.channel, self.bitrate_kbps)
    }

    pub fn sdo_timeout(&self) -> Duration {
        Duration::from_millis(self.sdo_timeout_ms)
    }

    /// Get the default log directory path
    pub fn default_log_directory() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "canopen", "canopen-browser")
            .map(|proj_dirs| proj_dirs.data_local_dir().join("logs"))
    }

    /// Get the log directory as PathBuf, using default if not set
    pub fn get_log_directory(&self) -> Option<PathBuf> {
        match &self.log_directory {
            Some(dir) => Some(PathBuf::from(dir)),
            None => Self::default_log_directory(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvalidNodeId;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = BrowserConfig {
            channel: "vcan0".to_string(),
            bitrate_kbps: 250,
            node_id: 5,
            eds_file_path: Some("/tmp/device.eds".to_string()),
            ..BrowserConfig::default()
        };
        config.save_to(&path).unwrap();

        assert_eq!(BrowserConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "channel = \"vcan1\"\n").unwrap();

        let config = BrowserConfig::load_from(&path).unwrap();
        assert_eq!(config.channel, "vcan1");
        assert_eq!(config.bitrate_kbps, 500);
        assert_eq!(config.sdo_timeout(), Duration::from_millis(1000));
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "bitrate_kbps = \"fast\"").unwrap();

        assert!(matches!(BrowserConfig::load_from(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_out_of_range_node_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "node_id = 200\n").unwrap();

        assert!(matches!(
            BrowserConfig::load_from(&path),
            Err(ConfigError::InvalidNodeId(InvalidNodeId(200)))
        ));

        fs::write(&path, "node_id = 0\n").unwrap();
        assert!(matches!(BrowserConfig::load_from(&path), Err(ConfigError::InvalidNodeId(_))));
    }

    #[test]
    fn test_bus_settings() {
        let settings = BrowserConfig::default().bus_settings();
        assert_eq!(settings.bitrate, 500_000);
        assert_eq!(settings.channel, "can0");
    }
}
