//! The heart-rate-to-power control loop.
//!
//! `ErgController` owns the PID core and the power smoother, reacts to
//! heart-rate notifications, mediates device attach/detach, and is the sole
//! writer of target power to the trainer. All mutation runs through the
//! session task that owns the controller and drains one `SessionEvent`
//! channel, so notification handling and attach operations never
//! interleave.

use crate::control::pid::{PidConfig, PidController};
use crate::control::smoothing::PowerSmoother;
use crate::sensors::types::SensorError;
use crate::storage::settings::SettingsStore;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// A decoded trainer data page, reduced to what the loop consumes.
#[derive(Debug, Clone, Copy)]
pub struct TrainerDataPage {
    /// Instantaneous power in watts
    pub instantaneous_power: i16,
}

/// Device events delivered onto the session channel.
///
/// BLE forwarder tasks parse notifications and send these; the session task
/// feeds them back into the controller one at a time.
#[derive(Debug)]
pub enum SessionEvent {
    /// A heart-rate measurement in bpm
    HeartRate(u16),
    /// A trainer data page
    TrainerData(TrainerDataPage),
}

/// Events published to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TelemetryEvent {
    /// Latest heart rate in bpm
    HeartRate(u16),
    /// Smoothed trainer power in watts
    TrainerPower(f64),
}

/// A connected heart-rate source.
///
/// Implementations subscribe to the device's measurement stream and forward
/// parsed readings onto the session channel.
#[async_trait]
pub trait HeartRateSource: Send {
    /// Stable device address used as its identity for persistence.
    fn device_id(&self) -> &str;

    /// Subscribe to heart-rate notifications, forwarding them as
    /// [`SessionEvent::HeartRate`].
    async fn subscribe(&mut self, events: mpsc::Sender<SessionEvent>) -> Result<(), SensorError>;

    /// Close the underlying link.
    async fn disconnect(&mut self) -> Result<(), SensorError>;
}

/// A connected controllable trainer.
#[async_trait]
pub trait Trainer: Send {
    /// Stable device address used as its identity for persistence.
    fn device_id(&self) -> &str;

    /// Enable the trainer's data-page stream, forwarding pages as
    /// [`SessionEvent::TrainerData`].
    async fn subscribe(&mut self, events: mpsc::Sender<SessionEvent>) -> Result<(), SensorError>;

    /// Command a new target power in watts.
    async fn set_target_power(&mut self, watts: u16) -> Result<(), SensorError>;

    /// Close the underlying link.
    async fn disconnect(&mut self) -> Result<(), SensorError>;
}

/// Errors from control-loop operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Target power was dispatched with no trainer attached. The state
    /// machine guards the PID path; hitting this is a programming error.
    #[error("no trainer attached")]
    TrainerNotAttached,

    /// A device operation failed
    #[error(transparent)]
    Sensor(#[from] SensorError),
}

/// The control loop coordinator.
pub struct ErgController {
    pid: PidController,
    smoother: PowerSmoother,
    hr_source: Option<Box<dyn HeartRateSource>>,
    trainer: Option<Box<dyn Trainer>>,
    running: bool,
    ever_started: bool,
    current_hr: u16,
    current_target_power: u16,
    setpoint_bpm: u16,
    min_power_w: u16,
    max_power_w: u16,
    settings: Arc<SettingsStore>,
    session_tx: mpsc::Sender<SessionEvent>,
    telemetry_tx: Option<crossbeam::channel::Sender<TelemetryEvent>>,
}

impl ErgController {
    /// Create a controller with no attached devices and output disabled.
    ///
    /// `starting_power_w` is applied to the first trainer attached, before
    /// any PID-driven dispatch, so the ride starts at a sane resistance.
    pub fn new(
        config: PidConfig,
        starting_power_w: u16,
        settings: Arc<SettingsStore>,
        session_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let setpoint_bpm = config.setpoint_bpm;
        let min_power_w = config.min_power_w;
        let max_power_w = config.max_power_w;
        Self {
            pid: PidController::new(&config),
            smoother: PowerSmoother::new(),
            hr_source: None,
            trainer: None,
            running: false,
            ever_started: false,
            current_hr: 0,
            current_target_power: starting_power_w,
            setpoint_bpm,
            min_power_w,
            max_power_w,
            settings,
            session_tx,
            telemetry_tx: None,
        }
    }

    /// Get a receiver for telemetry events (heart rate, smoothed power).
    pub fn event_receiver(&mut self) -> crossbeam::channel::Receiver<TelemetryEvent> {
        let (tx, rx) = crossbeam::channel::unbounded();
        self.telemetry_tx = Some(tx);
        rx
    }

    fn publish(&self, event: TelemetryEvent) {
        if let Some(tx) = &self.telemetry_tx {
            let _ = tx.send(event);
        }
    }

    /// Attach a heart-rate source, replacing and closing any previous one.
    ///
    /// Subscribes to its notification stream and persists its identity for
    /// reconnection on the next launch. Errors closing the old link are
    /// logged, not propagated; subscription failures are.
    pub async fn attach_heart_rate(
        &mut self,
        mut link: Box<dyn HeartRateSource>,
    ) -> Result<(), ControlError> {
        if let Some(mut old) = self.hr_source.take() {
            if let Err(e) = old.disconnect().await {
                tracing::warn!("Failed to close previous heart-rate link: {e}");
            }
        }

        link.subscribe(self.session_tx.clone()).await?;
        tracing::info!("Heart-rate source attached: {}", link.device_id());

        if let Err(e) = self.settings.set_last_used_hrm(link.device_id()) {
            tracing::warn!("Could not persist heart-rate device id: {e}");
        }

        self.hr_source = Some(link);
        Ok(())
    }

    /// Attach a trainer, replacing and closing any previous one.
    ///
    /// Control is paused first so no power write races the link swap. The
    /// last-known target power is re-applied to the new trainer, keeping
    /// physical resistance consistent across a hardware swap.
    pub async fn attach_trainer(&mut self, mut link: Box<dyn Trainer>) -> Result<(), ControlError> {
        self.pause();

        if let Some(mut old) = self.trainer.take() {
            if let Err(e) = old.disconnect().await {
                tracing::warn!("Failed to close previous trainer link: {e}");
            }
        }

        link.subscribe(self.session_tx.clone()).await?;
        tracing::info!("Trainer attached: {}", link.device_id());

        let device_id = link.device_id().to_string();
        self.trainer = Some(link);

        let target = self.current_target_power;
        self.set_current_power(target).await?;

        if let Err(e) = self.settings.set_last_used_trainer(&device_id) {
            tracing::warn!("Could not persist trainer device id: {e}");
        }

        Ok(())
    }

    /// Begin applying PID output to the trainer.
    ///
    /// Returns false (leaving state unchanged) unless both a heart-rate
    /// source and a trainer are attached.
    pub fn start(&mut self) -> bool {
        if self.trainer.is_none() || self.hr_source.is_none() {
            tracing::info!("Trainer and heart-rate source must be attached to start");
            return false;
        }
        self.running = true;
        self.ever_started = true;
        self.pid.enable();
        tracing::info!("Control loop started, setpoint {} bpm", self.setpoint_bpm);
        true
    }

    /// Stop applying PID output. The PID keeps adapting so a later start
    /// resumes from a warm integral term rather than a cold one.
    pub fn stop(&mut self) {
        self.running = false;
        tracing::info!("stopping");
    }

    /// Same effect as [`stop`](Self::stop).
    pub fn pause(&mut self) {
        self.running = false;
    }

    /// Clear the PID's accumulated state. Does not change running state.
    pub fn reset(&mut self) {
        self.pid.reset();
    }

    /// Update the heart-rate setpoint.
    pub fn set_target_hr(&mut self, bpm: u16) {
        self.setpoint_bpm = bpm;
        self.pid.set_setpoint(bpm);
    }

    /// Update the lower power bound. The full current pair is handed to the
    /// PID so the other bound is never transiently invalidated.
    pub fn set_min_power(&mut self, watts: u16) {
        self.min_power_w = watts;
        self.pid.set_output_bounds(self.min_power_w, self.max_power_w);
    }

    /// Update the upper power bound. See [`set_min_power`](Self::set_min_power).
    pub fn set_max_power(&mut self, watts: u16) {
        self.max_power_w = watts;
        self.pid.set_output_bounds(self.min_power_w, self.max_power_w);
    }

    /// Update the proportional gain.
    pub fn set_kp(&mut self, value: f64) {
        self.pid.set_kp(value);
    }

    /// Update the integral gain.
    pub fn set_ki(&mut self, value: f64) {
        self.pid.set_ki(value);
    }

    /// Update the derivative gain.
    pub fn set_kd(&mut self, value: f64) {
        self.pid.set_kd(value);
    }

    /// Feed one session event through the loop.
    pub async fn handle_event(&mut self, event: SessionEvent) -> Result<(), ControlError> {
        match event {
            SessionEvent::HeartRate(bpm) => self.on_heart_rate(bpm).await,
            SessionEvent::TrainerData(page) => {
                self.on_trainer_data(page);
                Ok(())
            }
        }
    }

    /// Handle one heart-rate notification: record it, evaluate the PID,
    /// and dispatch the truncated output as target power when running.
    ///
    /// The evaluation runs even while stopped so the integral term keeps
    /// tracking the rider; only the output application is gated.
    pub async fn on_heart_rate(&mut self, bpm: u16) -> Result<(), ControlError> {
        self.current_hr = bpm;
        tracing::info!("Received new HR value {bpm}");
        self.publish(TelemetryEvent::HeartRate(bpm));

        let control = self.pid.evaluate(bpm);

        if let Some(control) = control {
            if self.running {
                tracing::info!(
                    "PID control value changing from {} to {control:.2}",
                    self.current_target_power
                );
            } else {
                tracing::info!(
                    "PID control value {control:.2} computed, output gated while stopped"
                );
            }
        }

        if !self.running {
            return Ok(());
        }

        if let Some(control) = control {
            // Truncation toward zero, matching long-standing behavior.
            let watts = control as u16;
            self.set_current_power(watts).await?;
        }

        Ok(())
    }

    /// Handle one trainer data page: feed the smoother and publish the
    /// smoothed reading.
    pub fn on_trainer_data(&mut self, page: TrainerDataPage) {
        self.smoother.record(page.instantaneous_power);
        self.publish(TelemetryEvent::TrainerPower(self.smoother.current()));
    }

    /// Directly command a target power, bypassing the PID. Always
    /// permitted, running or not.
    pub async fn set_current_power(&mut self, watts: u16) -> Result<(), ControlError> {
        let trainer = self.trainer.as_mut().ok_or(ControlError::TrainerNotAttached)?;
        trainer.set_target_power(watts).await?;
        self.current_target_power = watts;
        Ok(())
    }

    /// Smoothed trainer power in watts, 0 before any data page arrived.
    pub fn current_trainer_power(&self) -> f64 {
        self.smoother.current()
    }

    /// Last received heart rate in bpm, 0 before the first sample.
    pub fn current_heart_rate(&self) -> u16 {
        self.current_hr
    }

    /// Last wattage sent to (or intended for) the trainer.
    pub fn target_power(&self) -> u16 {
        self.current_target_power
    }

    /// Current heart-rate setpoint in bpm.
    pub fn hr_setpoint(&self) -> u16 {
        self.setpoint_bpm
    }

    /// Whether PID output is currently applied to the trainer.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Whether the loop has ever been started in this session.
    pub fn ever_started(&self) -> bool {
        self.ever_started
    }

    /// Stop the loop and close both device links.
    pub async fn shutdown(&mut self) {
        self.stop();
        if let Some(mut hr) = self.hr_source.take() {
            if let Err(e) = hr.disconnect().await {
                tracing::warn!("Failed to close heart-rate link: {e}");
            }
        }
        if let Some(mut trainer) = self.trainer.take() {
            if let Err(e) = trainer.disconnect().await {
                tracing::warn!("Failed to close trainer link: {e}");
            }
        }
    }
}
