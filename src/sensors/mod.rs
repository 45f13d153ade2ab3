//! BLE sensor discovery, connection, and wire formats.

pub mod ble;
pub mod gatt;
pub mod manager;
pub mod types;

pub use ble::{BleFtmsTrainer, BleHeartRateMonitor};
pub use manager::SensorManager;
pub use types::{DiscoveredSensor, ScanEvent, SensorConfig, SensorError, SensorKind};
