//! Persisted last-used device settings.
//!
//! A small string key-value store backed by a TOML file. The backing file
//! is not safe for concurrent access, so every read and write goes through
//! one mutex.

use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

/// Key for the last used heart-rate monitor address.
pub const KEY_HRM: &str = "hrm";
/// Key for the last used trainer address.
pub const KEY_TRAINER: &str = "trainer";

/// Errors from the settings store.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}

/// Mutex-serialized key-value store for device identities.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SettingsStore {
    /// Open a store backed by the given file. The file is created lazily
    /// on first write.
    pub fn open(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Read a value by key, `None` if the key (or the file) is absent.
    pub fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let table = self.read_table()?;
        Ok(table
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()))
    }

    /// Write a value by key, replacing any previous value.
    pub fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut table = self.read_table()?;
        table.insert(key.to_string(), toml::Value::String(value.to_string()));

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SettingsError::IoError(e.to_string()))?;
        }
        let content = toml::to_string_pretty(&table)
            .map_err(|e| SettingsError::SerializeError(e.to_string()))?;
        std::fs::write(&self.path, content).map_err(|e| SettingsError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Address of the last used heart-rate monitor, if any.
    pub fn last_used_hrm(&self) -> Result<Option<String>, SettingsError> {
        self.get(KEY_HRM)
    }

    /// Remember the heart-rate monitor address for the next launch.
    pub fn set_last_used_hrm(&self, address: &str) -> Result<(), SettingsError> {
        self.set(KEY_HRM, address)
    }

    /// Address of the last used trainer, if any.
    pub fn last_used_trainer(&self) -> Result<Option<String>, SettingsError> {
        self.get(KEY_TRAINER)
    }

    /// Remember the trainer address for the next launch.
    pub fn set_last_used_trainer(&self, address: &str) -> Result<(), SettingsError> {
        self.set(KEY_TRAINER, address)
    }

    fn read_table(&self) -> Result<toml::Table, SettingsError> {
        if !self.path.exists() {
            return Ok(toml::Table::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| SettingsError::IoError(e.to_string()))?;
        content
            .parse::<toml::Table>()
            .map_err(|e| SettingsError::ParseError(e.to_string()))
    }
}
