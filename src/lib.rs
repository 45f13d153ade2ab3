//! PulseRide - heart-rate driven ERG control for BLE smart trainers.
//!
//! Connects to a BLE heart-rate monitor and an FTMS smart trainer and
//! drives the rider's heart rate toward a configurable setpoint by
//! closed-loop PID control of the trainer's target power.

pub mod app;
pub mod control;
pub mod sensors;
pub mod storage;

// Re-export commonly used types
pub use control::{ErgController, PidConfig, PidController, PowerSmoother};
pub use sensors::manager::SensorManager;
pub use storage::config::AppConfig;
pub use storage::settings::SettingsStore;
