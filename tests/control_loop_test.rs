//! Integration tests for the heart-rate-to-power control loop, driven
//! through mock device links.

use async_trait::async_trait;
use pulseride::control::{
    ControlError, ErgController, HeartRateSource, PidConfig, SessionEvent, TelemetryEvent,
    Trainer, TrainerDataPage,
};
use pulseride::sensors::types::SensorError;
use pulseride::storage::settings::{SettingsStore, KEY_HRM, KEY_TRAINER};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

struct MockHeartRateMonitor {
    id: String,
}

impl MockHeartRateMonitor {
    fn new(id: &str) -> Box<Self> {
        Box::new(Self { id: id.to_string() })
    }
}

#[async_trait]
impl HeartRateSource for MockHeartRateMonitor {
    fn device_id(&self) -> &str {
        &self.id
    }

    async fn subscribe(&mut self, _events: mpsc::Sender<SessionEvent>) -> Result<(), SensorError> {
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SensorError> {
        Ok(())
    }
}

struct MockTrainer {
    id: String,
    dispatched: Arc<Mutex<Vec<u16>>>,
}

impl MockTrainer {
    fn new(id: &str) -> (Box<Self>, Arc<Mutex<Vec<u16>>>) {
        let dispatched = Arc::new(Mutex::new(Vec::new()));
        (
            Box::new(Self {
                id: id.to_string(),
                dispatched: dispatched.clone(),
            }),
            dispatched,
        )
    }
}

#[async_trait]
impl Trainer for MockTrainer {
    fn device_id(&self) -> &str {
        &self.id
    }

    async fn subscribe(&mut self, _events: mpsc::Sender<SessionEvent>) -> Result<(), SensorError> {
        Ok(())
    }

    async fn set_target_power(&mut self, watts: u16) -> Result<(), SensorError> {
        self.dispatched.lock().unwrap().push(watts);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SensorError> {
        Ok(())
    }
}

struct Harness {
    controller: ErgController,
    settings: Arc<SettingsStore>,
    _session_rx: mpsc::Receiver<SessionEvent>,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    harness_with_config(PidConfig::default(), 180)
}

fn harness_with_config(config: PidConfig, starting_power_w: u16) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let settings = Arc::new(SettingsStore::open(dir.path().join("devices.toml")));
    let (session_tx, session_rx) = mpsc::channel(16);
    let controller = ErgController::new(config, starting_power_w, settings.clone(), session_tx);
    Harness {
        controller,
        settings,
        _session_rx: session_rx,
        _dir: dir,
    }
}

async fn attach_both(harness: &mut Harness) -> Arc<Mutex<Vec<u16>>> {
    let (trainer, dispatched) = MockTrainer::new("trainer-1");
    harness
        .controller
        .attach_heart_rate(MockHeartRateMonitor::new("hrm-1"))
        .await
        .unwrap();
    harness.controller.attach_trainer(trainer).await.unwrap();
    dispatched
}

#[tokio::test]
async fn start_requires_both_devices() {
    let mut harness = harness();
    assert!(!harness.controller.start());
    assert!(!harness.controller.is_running());

    harness
        .controller
        .attach_heart_rate(MockHeartRateMonitor::new("hrm-1"))
        .await
        .unwrap();
    assert!(!harness.controller.start());

    let (trainer, _dispatched) = MockTrainer::new("trainer-1");
    harness.controller.attach_trainer(trainer).await.unwrap();
    assert!(harness.controller.start());
    assert!(harness.controller.is_running());
    assert!(harness.controller.ever_started());
}

#[tokio::test]
async fn attach_trainer_applies_starting_power() {
    let mut harness = harness();
    let dispatched = attach_both(&mut harness).await;
    // The configured starting power reaches the trainer before any
    // PID-driven dispatch.
    assert_eq!(*dispatched.lock().unwrap(), vec![180]);
    assert_eq!(harness.controller.target_power(), 180);
}

#[tokio::test]
async fn heart_rate_drives_power_when_running() {
    let mut harness = harness();
    let dispatched = attach_both(&mut harness).await;
    assert!(harness.controller.start());

    harness.controller.on_heart_rate(120).await.unwrap();

    let log = dispatched.lock().unwrap();
    assert_eq!(log.len(), 2, "expected starting power plus one dispatch");
    assert_eq!(harness.controller.target_power(), *log.last().unwrap());
    assert_eq!(harness.controller.current_heart_rate(), 120);
}

#[tokio::test]
async fn stop_gates_dispatch_but_state_still_tracks() {
    let mut harness = harness();
    let dispatched = attach_both(&mut harness).await;
    assert!(harness.controller.start());
    harness.controller.on_heart_rate(120).await.unwrap();
    let count_before = dispatched.lock().unwrap().len();

    harness.controller.stop();
    harness.controller.on_heart_rate(118).await.unwrap();
    harness.controller.on_heart_rate(116).await.unwrap();

    assert_eq!(dispatched.lock().unwrap().len(), count_before);
    // The session kept observing even though nothing was applied.
    assert_eq!(harness.controller.current_heart_rate(), 116);

    // Restarting resumes dispatch without a cold PID.
    assert!(harness.controller.start());
    harness.controller.on_heart_rate(115).await.unwrap();
    assert_eq!(dispatched.lock().unwrap().len(), count_before + 1);
}

#[tokio::test]
async fn trainer_swap_reapplies_last_target() {
    let mut harness = harness();
    let first = attach_both(&mut harness).await;
    assert!(harness.controller.start());

    harness.controller.set_current_power(220).await.unwrap();
    assert_eq!(*first.lock().unwrap(), vec![180, 220]);

    let (replacement, second) = MockTrainer::new("trainer-2");
    harness.controller.attach_trainer(replacement).await.unwrap();

    // The new hardware starts at the old target, before any PID dispatch.
    assert_eq!(*second.lock().unwrap(), vec![220]);
    // The swap paused control; output stays gated until started again.
    assert!(!harness.controller.is_running());
    harness.controller.on_heart_rate(120).await.unwrap();
    assert_eq!(*second.lock().unwrap(), vec![220]);
}

#[tokio::test]
async fn dispatched_power_respects_bounds() {
    let mut harness = harness();
    let dispatched = attach_both(&mut harness).await;
    harness.controller.set_min_power(100);
    harness.controller.set_max_power(300);
    assert!(harness.controller.start());

    // Far below setpoint: a huge positive error.
    harness.controller.on_heart_rate(40).await.unwrap();
    // Far above setpoint: a huge negative error.
    harness.controller.on_heart_rate(220).await.unwrap();

    let log = dispatched.lock().unwrap();
    for &watts in log.iter().skip(1) {
        assert!(
            (100..=300).contains(&watts),
            "dispatched {watts}W outside [100, 300]"
        );
    }
}

#[tokio::test]
async fn bound_setters_pass_the_full_pair() {
    let mut harness = harness();
    let dispatched = attach_both(&mut harness).await;
    // Two independent calls; neither may clobber the other bound.
    harness.controller.set_min_power(100);
    harness.controller.set_max_power(300);
    assert!(harness.controller.start());
    harness.controller.on_heart_rate(40).await.unwrap();
    let ceiling = *dispatched.lock().unwrap().last().unwrap();
    assert!(ceiling <= 300);

    // Raising the floor afterwards must keep the ceiling intact.
    harness.controller.set_min_power(150);
    harness.controller.on_heart_rate(220).await.unwrap();
    let floor = *dispatched.lock().unwrap().last().unwrap();
    assert!((150..=300).contains(&floor));
}

#[tokio::test]
async fn manual_power_override_works_while_stopped() {
    let mut harness = harness();
    let dispatched = attach_both(&mut harness).await;
    assert!(!harness.controller.is_running());

    harness.controller.set_current_power(250).await.unwrap();

    assert_eq!(*dispatched.lock().unwrap(), vec![180, 250]);
    assert_eq!(harness.controller.target_power(), 250);
}

#[tokio::test]
async fn dispatch_without_trainer_is_an_error() {
    let mut harness = harness();
    let result = harness.controller.set_current_power(200).await;
    assert!(matches!(result, Err(ControlError::TrainerNotAttached)));
}

#[tokio::test]
async fn attach_persists_device_identities() {
    let mut harness = harness();
    attach_both(&mut harness).await;
    assert_eq!(
        harness.settings.get(KEY_HRM).unwrap().as_deref(),
        Some("hrm-1")
    );
    assert_eq!(
        harness.settings.get(KEY_TRAINER).unwrap().as_deref(),
        Some("trainer-1")
    );
}

#[tokio::test]
async fn trainer_data_pages_feed_the_power_average() {
    let mut harness = harness();
    assert_eq!(harness.controller.current_trainer_power(), 0.0);

    for power in [100, 200, 300, 400] {
        harness
            .controller
            .handle_event(SessionEvent::TrainerData(TrainerDataPage {
                instantaneous_power: power,
            }))
            .await
            .unwrap();
    }

    // Mean of the last three pages.
    assert_eq!(harness.controller.current_trainer_power(), 300.0);
}

#[tokio::test]
async fn telemetry_reaches_subscribers() {
    let mut harness = harness();
    let telemetry = harness.controller.event_receiver();

    harness.controller.on_heart_rate(142).await.unwrap();
    harness.controller.on_trainer_data(TrainerDataPage {
        instantaneous_power: 210,
    });

    assert_eq!(telemetry.try_recv(), Ok(TelemetryEvent::HeartRate(142)));
    assert_eq!(
        telemetry.try_recv(),
        Ok(TelemetryEvent::TrainerPower(210.0))
    );
}

#[tokio::test]
async fn setpoint_and_gain_changes_apply_to_later_dispatches() {
    let mut harness = harness_with_config(
        PidConfig {
            ki: 0.0,
            kd: 0.0,
            kp: 1.0,
            min_power_w: 0,
            max_power_w: 600,
            ..PidConfig::default()
        },
        180,
    );
    let dispatched = attach_both(&mut harness).await;
    assert!(harness.controller.start());

    // Pure proportional, error 135 - 125 = 10.
    harness.controller.on_heart_rate(125).await.unwrap();
    assert_eq!(*dispatched.lock().unwrap().last().unwrap(), 10);

    harness.controller.set_target_hr(150);
    assert_eq!(harness.controller.hr_setpoint(), 150);
    // Error is now 150 - 125 = 25.
    harness.controller.on_heart_rate(125).await.unwrap();
    assert_eq!(*dispatched.lock().unwrap().last().unwrap(), 25);

    harness.controller.set_kp(2.0);
    harness.controller.on_heart_rate(125).await.unwrap();
    assert_eq!(*dispatched.lock().unwrap().last().unwrap(), 50);
}
