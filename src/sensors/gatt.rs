//! GATT wire formats for the heart-rate and fitness-machine services.
//!
//! Covers exactly what the control loop consumes: the Heart Rate
//! Measurement characteristic, the FTMS Indoor Bike Data characteristic
//! (for instantaneous power), and the FTMS Control Point commands used to
//! drive ERG mode.

use crate::sensors::types::SensorError;
use uuid::Uuid;

/// Heart Rate Service UUID (0x180D)
pub const HEART_RATE_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_180d_0000_1000_8000_0080_5f9b_34fb);

/// Heart Rate Measurement UUID (0x2A37)
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a37_0000_1000_8000_0080_5f9b_34fb);

/// FTMS Service UUID (0x1826)
pub const FTMS_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1826_0000_1000_8000_0080_5f9b_34fb);

/// Indoor Bike Data Characteristic UUID (0x2AD2)
pub const INDOOR_BIKE_DATA_UUID: Uuid = Uuid::from_u128(0x0000_2ad2_0000_1000_8000_0080_5f9b_34fb);

/// Fitness Machine Control Point UUID (0x2AD9)
pub const FTMS_CONTROL_POINT_UUID: Uuid =
    Uuid::from_u128(0x0000_2ad9_0000_1000_8000_0080_5f9b_34fb);

/// A decoded Heart Rate Measurement notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartRateMeasurement {
    /// Heart rate in beats per minute
    pub bpm: u16,
    /// Skin contact detected, when the sensor supports contact detection
    pub sensor_contact: bool,
}

/// Parse a Heart Rate Measurement notification.
///
/// Byte 0 is a flags byte. Flag bit 0 set means the heart-rate value is a
/// little-endian u16 in bytes 1-2; clear means a single u8 at index 1.
/// Payloads too short for their declared format are an error, never a
/// garbage reading.
pub fn parse_heart_rate_measurement(data: &[u8]) -> Result<HeartRateMeasurement, SensorError> {
    let flags = *data.first().ok_or_else(|| {
        SensorError::MalformedNotification("empty heart rate payload".to_string())
    })?;

    let uint16_format = (flags & 0x01) != 0;
    let contact_supported = (flags & 0x04) != 0;
    let sensor_contact = contact_supported && (flags & 0x02) != 0;

    let bpm = if uint16_format {
        if data.len() < 3 {
            return Err(SensorError::MalformedNotification(format!(
                "u16 heart rate needs 3 bytes, got {}",
                data.len()
            )));
        }
        u16::from_le_bytes([data[1], data[2]])
    } else {
        if data.len() < 2 {
            return Err(SensorError::MalformedNotification(format!(
                "u8 heart rate needs 2 bytes, got {}",
                data.len()
            )));
        }
        u16::from(data[1])
    };

    Ok(HeartRateMeasurement {
        bpm,
        sensor_contact,
    })
}

/// Fields the control loop reads from an Indoor Bike Data notification.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IndoorBikeData {
    /// Instantaneous speed in km/h (absent when the More Data flag is set)
    pub speed_kmh: Option<f32>,
    /// Instantaneous cadence in RPM
    pub cadence_rpm: Option<u16>,
    /// Instantaneous power in watts
    pub power_watts: Option<i16>,
}

/// Parse an Indoor Bike Data notification.
///
/// The first two bytes are a flags word; the remaining fields follow in
/// flag order. Fields this crate does not consume still occupy their wire
/// bytes and must be walked over to reach instantaneous power.
pub fn parse_indoor_bike_data(data: &[u8]) -> Option<IndoorBikeData> {
    if data.len() < 2 {
        return None;
    }
    let flags = u16::from_le_bytes([data[0], data[1]]);

    let more_data = flags & 0x0001 != 0;
    let avg_speed = flags & 0x0002 != 0;
    let inst_cadence = flags & 0x0004 != 0;
    let avg_cadence = flags & 0x0008 != 0;
    let total_distance = flags & 0x0010 != 0;
    let resistance_level = flags & 0x0020 != 0;
    let inst_power = flags & 0x0040 != 0;

    let mut result = IndoorBikeData::default();
    let mut offset = 2usize;

    let mut take = |n: usize| -> Option<usize> {
        let start = offset;
        offset += n;
        (offset <= data.len()).then_some(start)
    };

    // Instantaneous speed, 0.01 km/h resolution, present unless More Data.
    if !more_data {
        let at = take(2)?;
        let raw = u16::from_le_bytes([data[at], data[at + 1]]);
        result.speed_kmh = Some(f32::from(raw) / 100.0);
    }
    if avg_speed {
        take(2)?;
    }
    // Instantaneous cadence, 0.5 RPM resolution.
    if inst_cadence {
        let at = take(2)?;
        let raw = u16::from_le_bytes([data[at], data[at + 1]]);
        result.cadence_rpm = Some(raw / 2);
    }
    if avg_cadence {
        take(2)?;
    }
    // Total distance is a 24-bit field.
    if total_distance {
        take(3)?;
    }
    if resistance_level {
        take(2)?;
    }
    if inst_power {
        let at = take(2)?;
        result.power_watts = Some(i16::from_le_bytes([data[at], data[at + 1]]));
    }
    // Fields after instantaneous power are irrelevant here.

    Some(result)
}

/// FTMS Control Point opcodes used by this crate.
#[repr(u8)]
pub enum ControlOpcode {
    /// Request control of the fitness machine
    RequestControl = 0x00,
    /// Set target power (ERG mode)
    SetTargetPower = 0x05,
    /// Start or resume training
    StartOrResume = 0x07,
    /// Stop or pause training
    StopOrPause = 0x08,
}

/// Build a control point command to request control.
pub fn build_request_control() -> Vec<u8> {
    vec![ControlOpcode::RequestControl as u8]
}

/// Build a control point command to start training.
pub fn build_start_training() -> Vec<u8> {
    vec![ControlOpcode::StartOrResume as u8]
}

/// Build a control point command to stop or pause training.
pub fn build_stop_training(pause: bool) -> Vec<u8> {
    vec![
        ControlOpcode::StopOrPause as u8,
        if pause { 0x02 } else { 0x01 },
    ]
}

/// Build a control point command to set target power in watts.
pub fn build_set_target_power(target_watts: u16) -> Vec<u8> {
    let mut cmd = vec![ControlOpcode::SetTargetPower as u8];
    cmd.extend_from_slice(&target_watts.to_le_bytes());
    cmd
}
