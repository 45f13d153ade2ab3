//! Shared types for BLE fitness sensors.

use std::time::{Duration, Instant};
use thiserror::Error;

/// Kind of sensor relevant to the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    /// Smart trainer with FTMS support
    Trainer,
    /// Heart rate monitor
    HeartRate,
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorKind::Trainer => write!(f, "Smart Trainer"),
            SensorKind::HeartRate => write!(f, "Heart Rate"),
        }
    }
}

/// A sensor discovered during BLE scanning.
#[derive(Debug, Clone)]
pub struct DiscoveredSensor {
    /// BLE device address/identifier
    pub device_id: String,
    /// User-friendly name (from BLE advertisement)
    pub name: String,
    /// Detected sensor kind
    pub kind: SensorKind,
    /// Signal strength (RSSI)
    pub signal_strength: Option<i16>,
    /// When the sensor was last seen
    pub last_seen: Instant,
}

/// Events emitted during discovery.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// Scan started
    Started,
    /// Scan stopped
    Stopped,
    /// A new sensor was discovered
    Discovered(DiscoveredSensor),
    /// Error occurred while scanning
    Error(String),
}

/// Configuration for the sensor manager.
#[derive(Debug, Clone)]
pub struct SensorConfig {
    /// How long a discovery scan runs before giving up
    pub discovery_timeout: Duration,
    /// How long a connection attempt may take
    pub connection_timeout: Duration,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            discovery_timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
        }
    }
}

/// Errors that can occur in the sensor layer.
#[derive(Debug, Error)]
pub enum SensorError {
    /// BLE adapter not found or unavailable
    #[error("Bluetooth adapter not found")]
    AdapterNotFound,

    /// Failed to start BLE scanning
    #[error("Failed to start scanning: {0}")]
    ScanFailed(String),

    /// Sensor not found with given device ID
    #[error("Sensor not found: {0}")]
    SensorNotFound(String),

    /// Connection to sensor failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection attempt exceeded the configured timeout
    #[error("Connection timed out")]
    ConnectionTimeout,

    /// Failed to subscribe to sensor notifications
    #[error("Failed to subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    /// Failed to write to sensor characteristic
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Required GATT characteristic missing on the device
    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(uuid::Uuid),

    /// Notification payload did not match the expected wire format
    #[error("Malformed notification: {0}")]
    MalformedNotification(String),

    /// Generic BLE error
    #[error("BLE error: {0}")]
    BleError(String),
}
