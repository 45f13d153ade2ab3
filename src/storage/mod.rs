//! Configuration and persisted settings.

pub mod config;
pub mod settings;

pub use config::{AppConfig, ConfigError, ControlSettings, SensorSettings};
pub use settings::{SettingsError, SettingsStore};
