//! Headless application runtime.
//!
//! Wires the sensor manager, settings store, and control loop together:
//! scan, reconnect the last-used devices, then run the serialized session
//! loop until ctrl-c. Device selection prefers the addresses persisted
//! from the previous launch and falls back to the first sensor of each
//! kind the scan turns up.

use crate::control::{ErgController, PidConfig, SessionEvent, TelemetryEvent};
use crate::sensors::types::{DiscoveredSensor, SensorConfig, SensorKind};
use crate::sensors::SensorManager;
use crate::storage::config::AppConfig;
use crate::storage::settings::SettingsStore;
use anyhow::{bail, Context};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

fn pid_config(config: &AppConfig) -> PidConfig {
    let control = &config.control;
    PidConfig {
        kp: control.kp,
        ki: control.ki,
        kd: control.kd,
        setpoint_bpm: control.setpoint_bpm,
        min_power_w: control.min_power_w,
        max_power_w: control.max_power_w,
        sample_interval: Duration::from_secs(control.sample_interval_secs),
    }
}

fn select_device(
    discovered: &[DiscoveredSensor],
    kind: SensorKind,
    preferred: Option<&str>,
) -> Option<String> {
    let of_kind = || discovered.iter().filter(|s| s.kind == kind);
    if let Some(address) = preferred {
        if let Some(sensor) = of_kind().find(|s| s.device_id == address) {
            return Some(sensor.device_id.clone());
        }
    }
    of_kind().next().map(|s| s.device_id.clone())
}

/// Scan until both device kinds are found (preferring the persisted
/// addresses) or the discovery window closes.
async fn pick_devices(
    manager: &mut SensorManager,
    settings: &SettingsStore,
    window: Duration,
) -> anyhow::Result<(String, String)> {
    let preferred_hrm = settings.last_used_hrm().unwrap_or_default();
    let preferred_trainer = settings.last_used_trainer().unwrap_or_default();

    manager.start_discovery().await?;

    let deadline = Instant::now() + window;
    let picked = loop {
        let discovered = manager.get_discovered().await;
        let hrm = select_device(&discovered, SensorKind::HeartRate, preferred_hrm.as_deref());
        let trainer = select_device(
            &discovered,
            SensorKind::Trainer,
            preferred_trainer.as_deref(),
        );

        // Keep scanning for the remembered devices until the window
        // closes; settle for whatever is present at the deadline.
        let have_preferred = |choice: &Option<String>, preferred: &Option<String>| match preferred {
            Some(address) => choice.as_deref() == Some(address.as_str()),
            None => choice.is_some(),
        };
        let done = (have_preferred(&hrm, &preferred_hrm)
            && have_preferred(&trainer, &preferred_trainer))
            || Instant::now() >= deadline;

        if done {
            break (hrm, trainer);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    };

    manager.stop_discovery().await?;

    match picked {
        (Some(hrm), Some(trainer)) => Ok((hrm, trainer)),
        (None, _) => bail!("no heart-rate monitor found"),
        (_, None) => bail!("no trainer found"),
    }
}

/// Run the application until ctrl-c.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let settings = Arc::new(SettingsStore::open(
        crate::storage::config::get_settings_path(),
    ));

    let mut manager = SensorManager::new(SensorConfig {
        discovery_timeout: Duration::from_secs(config.sensors.discovery_timeout_secs),
        connection_timeout: Duration::from_secs(config.sensors.connection_timeout_secs),
    });
    manager.initialize().await.context("BLE adapter init")?;

    let window = Duration::from_secs(config.sensors.discovery_timeout_secs);
    let (hrm_id, trainer_id) = pick_devices(&mut manager, &settings, window).await?;
    tracing::info!("Using heart-rate monitor {hrm_id}, trainer {trainer_id}");

    let hr_link = manager
        .connect_heart_rate(&hrm_id)
        .await
        .context("heart-rate monitor unreachable")?;
    let trainer_link = manager
        .connect_trainer(&trainer_id)
        .await
        .context("trainer unreachable")?;

    let (session_tx, mut session_rx) = mpsc::channel::<SessionEvent>(64);
    let mut controller = ErgController::new(
        pid_config(&config),
        config.control.starting_power_w,
        settings,
        session_tx,
    );

    let telemetry_rx = controller.event_receiver();
    std::thread::spawn(move || {
        while let Ok(event) = telemetry_rx.recv() {
            match event {
                TelemetryEvent::HeartRate(bpm) => tracing::info!("HR {bpm} bpm"),
                TelemetryEvent::TrainerPower(watts) => tracing::info!("Power {watts:.0} W"),
            }
        }
    });

    controller.attach_heart_rate(Box::new(hr_link)).await?;
    controller.attach_trainer(Box::new(trainer_link)).await?;

    if !controller.start() {
        bail!("control loop failed to start");
    }

    loop {
        tokio::select! {
            event = session_rx.recv() => match event {
                Some(event) => {
                    if let Err(e) = controller.handle_event(event).await {
                        tracing::error!("Control loop error: {e}");
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    controller.shutdown().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sensor(id: &str, kind: SensorKind) -> DiscoveredSensor {
        DiscoveredSensor {
            device_id: id.to_string(),
            name: format!("{kind} {id}"),
            kind,
            signal_strength: None,
            last_seen: Instant::now(),
        }
    }

    #[test]
    fn select_prefers_persisted_address() {
        let discovered = vec![
            sensor("hrm-1", SensorKind::HeartRate),
            sensor("hrm-2", SensorKind::HeartRate),
        ];
        assert_eq!(
            select_device(&discovered, SensorKind::HeartRate, Some("hrm-2")),
            Some("hrm-2".to_string())
        );
    }

    #[test]
    fn select_falls_back_to_first_of_kind() {
        let discovered = vec![
            sensor("trainer-1", SensorKind::Trainer),
            sensor("hrm-1", SensorKind::HeartRate),
        ];
        assert_eq!(
            select_device(&discovered, SensorKind::HeartRate, Some("hrm-gone")),
            Some("hrm-1".to_string())
        );
        assert_eq!(
            select_device(&discovered, SensorKind::Trainer, None),
            Some("trainer-1".to_string())
        );
    }

    #[test]
    fn select_returns_none_when_kind_absent() {
        let discovered = vec![sensor("hrm-1", SensorKind::HeartRate)];
        assert_eq!(select_device(&discovered, SensorKind::Trainer, None), None);
    }
}
