//! Simulated sensor for running a node without hardware.
//!
//! Each metric is an independent random walk with mean reversion plus
//! per-reading noise, so consecutive samples are coherent the way a real
//! sensor's are. The scenario shapes the walk:
//! - `calm`: hovers well below the default limits
//! - `drifting`: creeps upward until limits are crossed, then stays high
//! - `flaky`: noisy, and roughly one sample in ten is a NaN fault
//! - `unwired`: `init` fails, as with a disconnected device

use std::fmt;

use crate::error::SensorError;
use crate::sensor::{Metric, Sample, Sensor};

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Irwin-Hall: sum of 12 uniform [0,1) values minus 6 is close to N(0,1).
fn approx_std_normal() -> f64 {
    (0..12).map(|_| fastrand::f64()).sum::<f64>() - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Selectable via the `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    Calm,
    Drifting,
    Flaky,
    Unwired,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "drifting" => Self::Drifting,
            "flaky" => Self::Flaky,
            "unwired" => Self::Unwired,
            _ => Self::Calm,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Calm => write!(f, "calm"),
            Self::Drifting => write!(f, "drifting"),
            Self::Flaky => write!(f, "flaky"),
            Self::Unwired => write!(f, "unwired"),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-metric walk
// ---------------------------------------------------------------------------

/// Physical envelope of one metric: where it rests, how far it can go.
struct Envelope {
    center: f64,
    min: f64,
    max: f64,
    /// Random-walk step sigma, in metric units.
    step: f64,
}

fn envelope(metric: Metric) -> Envelope {
    let (center, min, max, step) = match metric {
        Metric::Temperature => (24.0, -10.0, 60.0, 0.2),
        Metric::Humidity => (45.0, 0.0, 100.0, 0.5),
        Metric::WaterLevel => (50.0, 0.0, 100.0, 1.0),
        Metric::Load => (1.0, 0.0, 20.0, 0.05),
        Metric::AccelX | Metric::AccelY => (0.0, -4.0, 4.0, 0.02),
        Metric::AccelZ => (1.0, -4.0, 4.0, 0.02),
        Metric::GyroX | Metric::GyroY | Metric::GyroZ => (0.0, -250.0, 250.0, 1.5),
        Metric::GasPpm => (300.0, 0.0, 10_000.0, 15.0),
        Metric::Voltage => (0.8, 0.0, 3.3, 0.01),
    };
    Envelope {
        center,
        min,
        max,
        step,
    }
}

struct Walk {
    metric: Metric,
    envelope: Envelope,
    value: f64,
    /// Added to the value every sample; non-zero only when drifting.
    drift: f64,
    mean_reversion: f64,
    noise: f64,
}

impl Walk {
    fn new(metric: Metric, scenario: Scenario) -> Self {
        let envelope = envelope(metric);
        let span = envelope.max - envelope.min;
        let (drift, mean_reversion, noise_factor) = match scenario {
            Scenario::Drifting => (span * 0.01, 0.0, 0.5),
            Scenario::Flaky => (0.0, 0.05, 4.0),
            Scenario::Calm | Scenario::Unwired => (0.0, 0.1, 0.5),
        };
        Self {
            metric,
            value: envelope.center,
            noise: envelope.step * noise_factor,
            envelope,
            drift,
            mean_reversion,
        }
    }

    fn next(&mut self) -> f64 {
        let e = &self.envelope;
        let pull = self.mean_reversion * (e.center - self.value);
        self.value = (self.value + self.drift + pull + gaussian(0.0, e.step)).clamp(e.min, e.max);
        (self.value + gaussian(0.0, self.noise)).clamp(e.min, e.max)
    }
}

// ---------------------------------------------------------------------------
// Sensor
// ---------------------------------------------------------------------------

pub struct SimulatedSensor {
    scenario: Scenario,
    walks: Vec<Walk>,
    fault_prob: f64,
}

impl SimulatedSensor {
    pub fn new(metrics: &[Metric], scenario: Scenario) -> Self {
        Self {
            scenario,
            walks: metrics.iter().map(|&m| Walk::new(m, scenario)).collect(),
            fault_prob: if scenario == Scenario::Flaky { 0.1 } else { 0.0 },
        }
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }
}

impl Sensor for SimulatedSensor {
    fn init(&mut self) -> Result<(), SensorError> {
        if self.scenario == Scenario::Unwired {
            return Err(SensorError::Init("no response from device".into()));
        }
        Ok(())
    }

    fn sample(&mut self) -> Result<Sample, SensorError> {
        let faulty = fastrand::f64() < self.fault_prob;
        let mut sample = Sample::new();
        for (i, walk) in self.walks.iter_mut().enumerate() {
            let v = walk.next();
            // A fault corrupts the first reading; validation catches it.
            let v = if faulty && i == 0 { f64::NAN } else { v };
            sample = sample.with(walk.metric, v);
        }
        Ok(sample)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
