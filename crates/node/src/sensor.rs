//! Sensor collaborator seam: metric vocabulary, sampled values, and the
//! sensor-data payload conventions each node variant publishes.
//!
//! Raw acquisition (register reads, ADC mapping, filtering) lives behind the
//! [`Sensor`] trait; the control loop only ever sees a validated [`Sample`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SensorError;

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// A physical quantity a node can sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Temperature,
    Humidity,
    WaterLevel,
    Load,
    AccelX,
    AccelY,
    AccelZ,
    GyroX,
    GyroY,
    GyroZ,
    GasPpm,
    Voltage,
}

impl Metric {
    pub const ALL: [Metric; 12] = [
        Self::Temperature,
        Self::Humidity,
        Self::WaterLevel,
        Self::Load,
        Self::AccelX,
        Self::AccelY,
        Self::AccelZ,
        Self::GyroX,
        Self::GyroY,
        Self::GyroZ,
        Self::GasPpm,
        Self::Voltage,
    ];

    /// Canonical name, used in logs and alert payloads.
    pub fn name(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::WaterLevel => "water_level",
            Self::Load => "load",
            Self::AccelX => "accel_x",
            Self::AccelY => "accel_y",
            Self::AccelZ => "accel_z",
            Self::GyroX => "gyro_x",
            Self::GyroY => "gyro_y",
            Self::GyroZ => "gyro_z",
            Self::GasPpm => "gas_ppm",
            Self::Voltage => "voltage",
        }
    }

    /// Field name on the wire: JSON sensor payloads and threshold-config
    /// updates (`{"temp": 28.5}`).
    pub fn key(self) -> &'static str {
        match self {
            Self::Temperature => "temp",
            Self::Humidity => "hum",
            Self::WaterLevel => "level",
            Self::Load => "load",
            Self::AccelX => "accelX",
            Self::AccelY => "accelY",
            Self::AccelZ => "accelZ",
            Self::GyroX => "gyroX",
            Self::GyroY => "gyroY",
            Self::GyroZ => "gyroZ",
            Self::GasPpm => "gas_ppm",
            Self::Voltage => "voltage",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.key() == key)
    }

    pub fn unit(self) -> &'static str {
        match self {
            Self::Temperature => "°C",
            Self::Humidity | Self::WaterLevel => "%",
            Self::Load => "kg",
            Self::AccelX | Self::AccelY | Self::AccelZ => "g",
            Self::GyroX | Self::GyroY | Self::GyroZ => "°/s",
            Self::GasPpm => "ppm",
            Self::Voltage => "V",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Samples
// ---------------------------------------------------------------------------

/// One sampling cycle's worth of readings, in acquisition order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sample {
    readings: Vec<(Metric, f64)>,
}

impl Sample {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, metric: Metric, value: f64) -> Self {
        self.readings.push((metric, value));
        self
    }

    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.readings
            .iter()
            .find(|(m, _)| *m == metric)
            .map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
        self.readings.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Reject the whole sample if any reading is NaN or infinite.
    pub fn validate(self) -> Result<Self, SensorError> {
        match self.readings.iter().find(|(_, v)| !v.is_finite()) {
            Some((metric, _)) => Err(SensorError::InvalidReading(*metric)),
            None => Ok(self),
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborator trait
// ---------------------------------------------------------------------------

/// The hardware sensor behind a node.
pub trait Sensor {
    /// Bring the device up. Called once before the control loop starts; an
    /// error here halts the node for good.
    fn init(&mut self) -> Result<(), SensorError>;

    /// Acquire one sample. Errors skip the current cycle only.
    fn sample(&mut self) -> Result<Sample, SensorError>;
}

impl<S: Sensor + ?Sized> Sensor for Box<S> {
    fn init(&mut self) -> Result<(), SensorError> {
        (**self).init()
    }

    fn sample(&mut self) -> Result<Sample, SensorError> {
        (**self).sample()
    }
}

/// Stand-in for nodes that have no sampled quantity (button/LED panels).
#[derive(Debug, Default)]
pub struct NoSensor;

impl Sensor for NoSensor {
    fn init(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    fn sample(&mut self) -> Result<Sample, SensorError> {
        Ok(Sample::new())
    }
}

// ---------------------------------------------------------------------------
// sensor-data payload conventions
// ---------------------------------------------------------------------------

/// How a variant renders its sensor-data message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorFormat {
    /// `Temperature: 24.3°C, Temperature: 75.7°F, Humidity: 40.1%`
    Climate,
    /// `Water Level: 57`
    WaterLevel,
    /// `Load: 1.25 kg`
    Load,
    /// Flat JSON object keyed by [`Metric::key`].
    Json,
}

impl SensorFormat {
    pub fn render(self, sample: &Sample) -> String {
        match self {
            Self::Climate => {
                let t = sample.get(Metric::Temperature).unwrap_or_default();
                let h = sample.get(Metric::Humidity).unwrap_or_default();
                format!(
                    "Temperature: {t:.1}°C, Temperature: {:.1}°F, Humidity: {h:.1}%",
                    t * 9.0 / 5.0 + 32.0
                )
            }
            Self::WaterLevel => {
                let level = sample.get(Metric::WaterLevel).unwrap_or_default();
                format!("Water Level: {}", level.round() as i64)
            }
            Self::Load => {
                let load = sample.get(Metric::Load).unwrap_or_default();
                format!("Load: {load:.2} kg")
            }
            Self::Json => {
                let mut obj = Map::new();
                for (metric, value) in sample.iter() {
                    let v = match metric {
                        Metric::GasPpm => Value::from(value.round() as i64),
                        _ => Value::from((value * 100.0).round() / 100.0),
                    };
                    obj.insert(metric.key().to_string(), v);
                }
                Value::Object(obj).to_string()
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
