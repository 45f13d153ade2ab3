//! Heart-rate-to-power control loop.

pub mod controller;
pub mod pid;
pub mod smoothing;

pub use controller::{
    ControlError, ErgController, HeartRateSource, SessionEvent, TelemetryEvent, Trainer,
    TrainerDataPage,
};
pub use pid::{PidConfig, PidController};
pub use smoothing::PowerSmoother;
