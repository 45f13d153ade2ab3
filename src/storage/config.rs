//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Control-loop defaults applied at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlSettings {
    /// Proportional gain
    pub kp: f64,
    /// Integral gain
    pub ki: f64,
    /// Derivative gain
    pub kd: f64,
    /// Target heart rate in bpm
    pub setpoint_bpm: u16,
    /// Lower power clamp in watts
    pub min_power_w: u16,
    /// Upper power clamp in watts
    pub max_power_w: u16,
    /// Power applied to a freshly attached trainer before the loop runs
    pub starting_power_w: u16,
    /// Assumed spacing between heart-rate notifications in seconds
    pub sample_interval_secs: u64,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.1,
            kd: 0.05,
            setpoint_bpm: 135,
            min_power_w: 50,
            max_power_w: 600,
            starting_power_w: 180,
            sample_interval_secs: 5,
        }
    }
}

impl ControlSettings {
    /// Bounds must not be inverted and the starting power must fall inside
    /// them; an invalid file keeps the previous (default) values.
    pub fn is_valid(&self) -> bool {
        self.min_power_w <= self.max_power_w
            && (self.min_power_w..=self.max_power_w).contains(&self.starting_power_w)
            && self.sample_interval_secs > 0
    }
}

/// Sensor-related settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorSettings {
    /// Discovery scan window in seconds
    pub discovery_timeout_secs: u64,
    /// Timeout for a connection attempt in seconds
    pub connection_timeout_secs: u64,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            discovery_timeout_secs: 30,
            connection_timeout_secs: 10,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Data directory path
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Control-loop defaults
    pub control: ControlSettings,
    /// Sensor settings
    pub sensors: SensorSettings,
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "pulseride", "PulseRide")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Get the device settings-store file path.
pub fn get_settings_path() -> PathBuf {
    get_data_dir().join("devices.toml")
}

/// Load application configuration, falling back to defaults when the file
/// does not exist.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(get_config_path())
}

/// Load configuration from an explicit path.
pub fn load_config_from(path: PathBuf) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        let config = AppConfig {
            data_dir: get_data_dir(),
            ..Default::default()
        };
        return Ok(config);
    }

    let content =
        std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError(e.to_string()))?;

    let mut config: AppConfig =
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    if !config.control.is_valid() {
        // Swallow the bad values, keep running with the defaults.
        tracing::warn!(
            "Ignoring invalid control settings in {}: bounds [{}, {}], start {}",
            path.display(),
            config.control.min_power_w,
            config.control.max_power_w,
            config.control.starting_power_w,
        );
        config.control = ControlSettings::default();
    }

    config.data_dir = get_data_dir();

    Ok(config)
}

/// Save application configuration to file.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    let path = get_config_path();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_control_settings_are_valid() {
        assert!(ControlSettings::default().is_valid());
    }

    #[test]
    fn inverted_bounds_are_invalid() {
        let settings = ControlSettings {
            min_power_w: 400,
            max_power_w: 100,
            ..Default::default()
        };
        assert!(!settings.is_valid());
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(dir.path().join("config.toml")).unwrap();
        assert_eq!(config.control.setpoint_bpm, 135);
        assert_eq!(config.control.min_power_w, 50);
        assert_eq!(config.control.max_power_w, 600);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[control]
kp = 0.5
ki = 0.01
kd = 0.05
setpoint_bpm = 140
min_power_w = 180
max_power_w = 300
starting_power_w = 200
sample_interval_secs = 5

[sensors]
discovery_timeout_secs = 15
connection_timeout_secs = 10
"#,
        )
        .unwrap();
        let config = load_config_from(path).unwrap();
        assert_eq!(config.control.setpoint_bpm, 140);
        assert_eq!(config.control.min_power_w, 180);
        assert_eq!(config.sensors.discovery_timeout_secs, 15);
    }

    #[test]
    fn invalid_control_block_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[control]
kp = 1.0
ki = 0.1
kd = 0.05
setpoint_bpm = 140
min_power_w = 500
max_power_w = 100
starting_power_w = 200
sample_interval_secs = 5

[sensors]
discovery_timeout_secs = 30
connection_timeout_secs = 10
"#,
        )
        .unwrap();
        let config = load_config_from(path).unwrap();
        assert_eq!(config.control.min_power_w, 50);
        assert_eq!(config.control.max_power_w, 600);
    }
}
