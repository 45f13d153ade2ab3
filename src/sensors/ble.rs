//! BLE link implementations over btleplug.
//!
//! Wraps connected peripherals as [`HeartRateSource`] and [`Trainer`]
//! links. Each link spawns one forwarder task that parses notifications
//! and sends them onto the session channel; nothing here mutates control
//! state directly.

use crate::control::{HeartRateSource, SessionEvent, Trainer, TrainerDataPage};
use crate::sensors::gatt::{
    build_request_control, build_set_target_power, parse_heart_rate_measurement,
    parse_indoor_bike_data, FTMS_CONTROL_POINT_UUID, HEART_RATE_MEASUREMENT_UUID,
    INDOOR_BIKE_DATA_UUID,
};
use crate::sensors::types::SensorError;
use async_trait::async_trait;
use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use futures::stream::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

fn find_characteristic(
    peripheral: &Peripheral,
    uuid: Uuid,
) -> Result<Characteristic, SensorError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid)
        .ok_or(SensorError::CharacteristicNotFound(uuid))
}

/// A connected BLE heart-rate monitor.
pub struct BleHeartRateMonitor {
    peripheral: Peripheral,
    device_id: String,
    forwarder: Option<JoinHandle<()>>,
}

impl BleHeartRateMonitor {
    /// Wrap an already connected peripheral with discovered services.
    pub(crate) fn new(peripheral: Peripheral, device_id: String) -> Self {
        Self {
            peripheral,
            device_id,
            forwarder: None,
        }
    }
}

#[async_trait]
impl HeartRateSource for BleHeartRateMonitor {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn subscribe(&mut self, events: mpsc::Sender<SessionEvent>) -> Result<(), SensorError> {
        let characteristic = find_characteristic(&self.peripheral, HEART_RATE_MEASUREMENT_UUID)?;

        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| SensorError::SubscriptionFailed(e.to_string()))?;

        let mut notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;

        let device_id = self.device_id.clone();
        self.forwarder = Some(tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != HEART_RATE_MEASUREMENT_UUID {
                    continue;
                }
                match parse_heart_rate_measurement(&notification.value) {
                    Ok(measurement) => {
                        if events
                            .send(SessionEvent::HeartRate(measurement.bpm))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    // Surface the bad payload; the stream itself stays up.
                    Err(e) => tracing::error!("Heart-rate notification from {device_id}: {e}"),
                }
            }
            tracing::warn!("Heart-rate notification stream ended: {device_id}");
        }));

        tracing::info!("hr subscribed");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SensorError> {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))
    }
}

/// A connected FTMS smart trainer.
pub struct BleFtmsTrainer {
    peripheral: Peripheral,
    device_id: String,
    control_point: Characteristic,
    forwarder: Option<JoinHandle<()>>,
}

impl BleFtmsTrainer {
    /// Wrap an already connected peripheral and take control of it.
    ///
    /// FTMS requires a Request Control command before the machine accepts
    /// target-power writes.
    pub(crate) async fn new(peripheral: Peripheral, device_id: String) -> Result<Self, SensorError> {
        let control_point = find_characteristic(&peripheral, FTMS_CONTROL_POINT_UUID)?;

        peripheral
            .write(
                &control_point,
                &build_request_control(),
                WriteType::WithResponse,
            )
            .await
            .map_err(|e| SensorError::WriteFailed(e.to_string()))?;

        Ok(Self {
            peripheral,
            device_id,
            control_point,
            forwarder: None,
        })
    }
}

#[async_trait]
impl Trainer for BleFtmsTrainer {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn subscribe(&mut self, events: mpsc::Sender<SessionEvent>) -> Result<(), SensorError> {
        let characteristic = find_characteristic(&self.peripheral, INDOOR_BIKE_DATA_UUID)?;

        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| SensorError::SubscriptionFailed(e.to_string()))?;

        let mut notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;

        let device_id = self.device_id.clone();
        self.forwarder = Some(tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != INDOOR_BIKE_DATA_UUID {
                    continue;
                }
                let Some(data) = parse_indoor_bike_data(&notification.value) else {
                    tracing::error!("Unparseable indoor bike data page from {device_id}");
                    continue;
                };
                if let Some(power) = data.power_watts {
                    let page = TrainerDataPage {
                        instantaneous_power: power,
                    };
                    if events.send(SessionEvent::TrainerData(page)).await.is_err() {
                        break;
                    }
                }
            }
            tracing::warn!("Trainer notification stream ended: {device_id}");
        }));

        tracing::debug!("Trainer data pages enabled: {}", self.device_id);
        Ok(())
    }

    async fn set_target_power(&mut self, watts: u16) -> Result<(), SensorError> {
        self.peripheral
            .write(
                &self.control_point,
                &build_set_target_power(watts),
                WriteType::WithResponse,
            )
            .await
            .map_err(|e| SensorError::WriteFailed(e.to_string()))?;
        tracing::debug!("Set target power to {watts}W");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SensorError> {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))
    }
}
