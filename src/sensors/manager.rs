//! BLE device discovery and connection.
//!
//! The manager scans for heart-rate monitors and FTMS trainers, classifies
//! what it finds, and hands connected links to the control loop. It does
//! not retry failed connections; failures propagate to the caller.

use crate::sensors::ble::{BleFtmsTrainer, BleHeartRateMonitor};
use crate::sensors::gatt::{FTMS_SERVICE_UUID, HEART_RATE_SERVICE_UUID};
use crate::sensors::types::{DiscoveredSensor, ScanEvent, SensorConfig, SensorError, SensorKind};
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use crossbeam::channel::{Receiver, Sender};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// Manages BLE discovery and connection for the control loop's devices.
pub struct SensorManager {
    config: SensorConfig,
    adapter: Option<Adapter>,
    event_tx: Option<Sender<ScanEvent>>,
    /// Discovered sensors (device_id -> DiscoveredSensor)
    discovered: Arc<Mutex<HashMap<String, DiscoveredSensor>>>,
    is_scanning: Arc<Mutex<bool>>,
}

impl SensorManager {
    /// Create a new sensor manager.
    pub fn new(config: SensorConfig) -> Self {
        Self {
            config,
            adapter: None,
            event_tx: None,
            discovered: Arc::new(Mutex::new(HashMap::new())),
            is_scanning: Arc::new(Mutex::new(false)),
        }
    }

    /// Create a new sensor manager with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(SensorConfig::default())
    }

    /// Initialize the BLE adapter. Must be called before any other
    /// operation.
    pub async fn initialize(&mut self) -> Result<(), SensorError> {
        tracing::info!("Initializing SensorManager");

        let manager = Manager::new()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;

        let adapters = manager
            .adapters()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(SensorError::AdapterNotFound)?;

        tracing::info!("BLE adapter initialized");
        self.adapter = Some(adapter);

        Ok(())
    }

    /// Get a receiver for scan events.
    pub fn event_receiver(&mut self) -> Receiver<ScanEvent> {
        let (tx, rx) = crossbeam::channel::unbounded();
        self.event_tx = Some(tx);
        rx
    }

    fn send_event(&self, event: ScanEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    /// Start scanning for heart-rate monitors and trainers.
    pub async fn start_discovery(&mut self) -> Result<(), SensorError> {
        let adapter = self.adapter.as_ref().ok_or(SensorError::AdapterNotFound)?;

        {
            let mut is_scanning = self.is_scanning.lock().await;
            if *is_scanning {
                return Ok(());
            }
            *is_scanning = true;
        }

        tracing::info!("Starting sensor discovery");

        self.discovered.lock().await.clear();

        let scan_filter = ScanFilter {
            services: vec![HEART_RATE_SERVICE_UUID, FTMS_SERVICE_UUID],
        };

        adapter
            .start_scan(scan_filter)
            .await
            .map_err(|e| SensorError::ScanFailed(e.to_string()))?;

        self.send_event(ScanEvent::Started);

        let adapter_clone = adapter.clone();
        let discovered = self.discovered.clone();
        let event_tx = self.event_tx.clone();
        let is_scanning = self.is_scanning.clone();

        tokio::spawn(async move {
            Self::process_discovery_events(adapter_clone, discovered, event_tx, is_scanning).await;
        });

        Ok(())
    }

    async fn process_discovery_events(
        adapter: Adapter,
        discovered: Arc<Mutex<HashMap<String, DiscoveredSensor>>>,
        event_tx: Option<Sender<ScanEvent>>,
        is_scanning: Arc<Mutex<bool>>,
    ) {
        use futures::stream::StreamExt;

        let mut events = match adapter.events().await {
            Ok(events) => events,
            Err(e) => {
                tracing::error!("Failed to get adapter events: {}", e);
                if let Some(tx) = &event_tx {
                    let _ = tx.send(ScanEvent::Error(e.to_string()));
                }
                return;
            }
        };

        while let Some(event) = events.next().await {
            if !*is_scanning.lock().await {
                break;
            }

            if let CentralEvent::DeviceDiscovered(id) = event {
                let peripherals = match adapter.peripherals().await {
                    Ok(p) => p,
                    Err(_) => continue,
                };

                for peripheral in peripherals {
                    if peripheral.id() == id {
                        if let Some(sensor) = Self::classify_peripheral(&peripheral).await {
                            discovered
                                .lock()
                                .await
                                .insert(sensor.device_id.clone(), sensor.clone());

                            if let Some(tx) = &event_tx {
                                let _ = tx.send(ScanEvent::Discovered(sensor));
                            }
                        }
                    }
                }
            }
        }
    }

    /// Classify a peripheral from its advertised services.
    async fn classify_peripheral(peripheral: &Peripheral) -> Option<DiscoveredSensor> {
        let properties = peripheral.properties().await.ok()??;

        let name = properties
            .local_name
            .unwrap_or_else(|| "Unknown Sensor".to_string());

        // A trainer advertising both services counts as a trainer.
        let kind = if properties.services.contains(&FTMS_SERVICE_UUID) {
            SensorKind::Trainer
        } else if properties.services.contains(&HEART_RATE_SERVICE_UUID) {
            SensorKind::HeartRate
        } else {
            return None;
        };

        Some(DiscoveredSensor {
            device_id: peripheral.id().to_string(),
            name,
            kind,
            signal_strength: properties.rssi,
            last_seen: Instant::now(),
        })
    }

    /// Stop scanning.
    pub async fn stop_discovery(&mut self) -> Result<(), SensorError> {
        let adapter = self.adapter.as_ref().ok_or(SensorError::AdapterNotFound)?;

        {
            let mut is_scanning = self.is_scanning.lock().await;
            if !*is_scanning {
                return Ok(());
            }
            *is_scanning = false;
        }

        tracing::info!("Stopping sensor discovery");

        adapter
            .stop_scan()
            .await
            .map_err(|e| SensorError::ScanFailed(e.to_string()))?;

        self.send_event(ScanEvent::Stopped);

        Ok(())
    }

    /// Get a snapshot of discovered sensors.
    pub async fn get_discovered(&self) -> Vec<DiscoveredSensor> {
        self.discovered.lock().await.values().cloned().collect()
    }

    /// Whether a scan is currently running.
    pub async fn is_scanning(&self) -> bool {
        *self.is_scanning.lock().await
    }

    /// Connect to a heart-rate monitor and return it as a live link.
    pub async fn connect_heart_rate(
        &self,
        device_id: &str,
    ) -> Result<BleHeartRateMonitor, SensorError> {
        let peripheral = self.connect_peripheral(device_id).await?;
        Ok(BleHeartRateMonitor::new(peripheral, device_id.to_string()))
    }

    /// Connect to an FTMS trainer, take control of it, and return it as a
    /// live link.
    pub async fn connect_trainer(&self, device_id: &str) -> Result<BleFtmsTrainer, SensorError> {
        let peripheral = self.connect_peripheral(device_id).await?;
        BleFtmsTrainer::new(peripheral, device_id.to_string()).await
    }

    async fn connect_peripheral(&self, device_id: &str) -> Result<Peripheral, SensorError> {
        let adapter = self.adapter.as_ref().ok_or(SensorError::AdapterNotFound)?;

        tracing::info!("Connecting to sensor: {}", device_id);

        let peripherals = adapter
            .peripherals()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;

        let peripheral = peripherals
            .into_iter()
            .find(|p| p.id().to_string() == device_id)
            .ok_or_else(|| SensorError::SensorNotFound(device_id.to_string()))?;

        tokio::time::timeout(self.config.connection_timeout, peripheral.connect())
            .await
            .map_err(|_| SensorError::ConnectionTimeout)?
            .map_err(|e| SensorError::ConnectionFailed(e.to_string()))?;

        peripheral
            .discover_services()
            .await
            .map_err(|e| SensorError::ConnectionFailed(e.to_string()))?;

        tracing::info!("Connected to sensor: {}", device_id);

        Ok(peripheral)
    }
}
