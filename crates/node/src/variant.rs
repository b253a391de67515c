//! Node variants and their built-in profiles.
//!
//! A profile is the full default wiring of one kind of node: which topics it
//! talks on, what it samples and how it renders it, its initial limits and
//! its output/input tables. Configuration can override most of it.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::alerting::AlertFormat;
use crate::channels::Channel;
use crate::commands::VALVE_BANK;
use crate::indicator::{IndicatorBands, INDICATOR_BANK};
use crate::outputs::{OutputBank, OutputId};
use crate::sensor::{Metric, SensorFormat};

pub const BUZZER_BANK: &str = "buzzer";
pub const RED_LEDS: &str = "ledRED";
pub const GREEN_LEDS: &str = "ledGREEN";

const CONTROL_TOPIC: &str = "mqtt/request";
const STATUS_TOPIC: &str = "mqtt/response";
const THRESHOLD_TOPIC: &str = "arduino/Weather_threshold";
const ALERT_TOPIC: &str = "arduino/weather_alerts";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// Five buttons, each paired with a red and a green LED.
    LedButton,
    /// Temperature / humidity with a buzzer on over-threshold.
    #[default]
    Climate,
    /// Tank level with fill and drain relays.
    WaterLevel,
    LoadCell,
    /// 6-axis accelerometer / gyro.
    Motion,
    /// Gas concentration with a three-lamp indicator and buzzer.
    Gas,
}

impl Variant {
    pub fn name(self) -> &'static str {
        match self {
            Self::LedButton => "led_button",
            Self::Climate => "climate",
            Self::WaterLevel => "water_level",
            Self::LoadCell => "load_cell",
            Self::Motion => "motion",
            Self::Gas => "gas",
        }
    }

    /// Metrics the variant's sensor reports, in payload order.
    pub fn metrics(self) -> &'static [Metric] {
        match self {
            Self::LedButton => &[],
            Self::Climate => &[Metric::Temperature, Metric::Humidity],
            Self::WaterLevel => &[Metric::WaterLevel],
            Self::LoadCell => &[Metric::Load],
            Self::Motion => &[
                Metric::AccelX,
                Metric::AccelY,
                Metric::AccelZ,
                Metric::GyroX,
                Metric::GyroY,
                Metric::GyroZ,
                Metric::Temperature,
            ],
            Self::Gas => &[Metric::GasPpm, Metric::Voltage],
        }
    }

    pub fn profile(self) -> Profile {
        match self {
            Self::LedButton => led_button(),
            Self::Climate => climate(),
            Self::WaterLevel => water_level(),
            Self::LoadCell => load_cell(),
            Self::Motion => motion(),
            Self::Gas => gas(),
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A digital input and the outputs that mirror its debounced state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSpec {
    pub pin: u8,
    pub paired: Vec<OutputId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub variant: Variant,
    pub topics: Vec<(Channel, &'static str)>,
    /// `None` for nodes that never sample.
    pub sensor_format: Option<SensorFormat>,
    pub thresholds: Vec<(Metric, f64)>,
    pub alert_format: AlertFormat,
    pub banks: Vec<OutputBank>,
    pub inputs: Vec<InputSpec>,
    pub buzzer: Option<OutputId>,
    pub indicator: Option<IndicatorBands>,
    pub valves: bool,
    /// Also publish the status acknowledgment after every (re)connect.
    pub announce_on_connect: bool,
    pub sample_interval: Duration,
}

impl Profile {
    fn sensing(variant: Variant, data_topic: &'static str, format: SensorFormat) -> Self {
        Self {
            variant,
            topics: vec![
                (Channel::Control, CONTROL_TOPIC),
                (Channel::StatusResponse, STATUS_TOPIC),
                (Channel::SensorData, data_topic),
                (Channel::ThresholdConfig, THRESHOLD_TOPIC),
                (Channel::Alert, ALERT_TOPIC),
            ],
            sensor_format: Some(format),
            thresholds: Vec::new(),
            alert_format: AlertFormat::Json,
            banks: Vec::new(),
            inputs: Vec::new(),
            buzzer: None,
            indicator: None,
            valves: false,
            announce_on_connect: false,
            sample_interval: Duration::from_millis(1000),
        }
    }

    pub fn samples(&self) -> bool {
        self.sensor_format.is_some()
    }
}

fn bank(name: &'static str, pins: &[u8], addressable: bool, requires_activation: bool) -> OutputBank {
    OutputBank {
        name,
        pins: pins.to_vec(),
        addressable,
        requires_activation,
        relay: false,
    }
}

fn led_button() -> Profile {
    let buttons: [u8; 5] = [12, 14, 27, 26, 25];
    Profile {
        variant: Variant::LedButton,
        topics: vec![
            (Channel::Control, CONTROL_TOPIC),
            (Channel::StatusResponse, STATUS_TOPIC),
            (Channel::ActuatorControl, "arduino/Led"),
            (Channel::InputEvents, "arduino/Led"),
        ],
        sensor_format: None,
        thresholds: Vec::new(),
        alert_format: AlertFormat::Text,
        banks: vec![
            bank(RED_LEDS, &[2, 3, 4, 16, 17], true, false),
            bank(GREEN_LEDS, &[5, 18, 19, 21, 22], true, false),
        ],
        inputs: buttons
            .iter()
            .zip(1u8..)
            .map(|(&pin, i)| InputSpec {
                pin,
                paired: vec![OutputId::new(GREEN_LEDS, i), OutputId::new(RED_LEDS, i)],
            })
            .collect(),
        buzzer: None,
        indicator: None,
        valves: false,
        announce_on_connect: false,
        sample_interval: Duration::from_millis(1000),
    }
}

fn climate() -> Profile {
    Profile {
        thresholds: vec![(Metric::Temperature, 30.0), (Metric::Humidity, 70.0)],
        alert_format: AlertFormat::Text,
        banks: vec![bank(BUZZER_BANK, &[4], false, false)],
        buzzer: Some(OutputId::new(BUZZER_BANK, 1)),
        ..Profile::sensing(Variant::Climate, "arduino/Weather", SensorFormat::Climate)
    }
}

fn water_level() -> Profile {
    let mut p = Profile::sensing(Variant::WaterLevel, "arduino/sensor", SensorFormat::WaterLevel);
    p.topics
        .push((Channel::ActuatorControl, "arduino/sensor_Control"));
    p.banks = vec![OutputBank {
        relay: true,
        ..bank(VALVE_BANK, &[17, 16], false, true)
    }];
    p.valves = true;
    p.announce_on_connect = true;
    p.sample_interval = Duration::from_millis(500);
    p
}

fn load_cell() -> Profile {
    Profile {
        sample_interval: Duration::from_millis(500),
        ..Profile::sensing(Variant::LoadCell, "arduino/LoadCell", SensorFormat::Load)
    }
}

fn motion() -> Profile {
    Profile::sensing(Variant::Motion, "arduino/MPU6050", SensorFormat::Json)
}

fn gas() -> Profile {
    Profile {
        thresholds: vec![(Metric::GasPpm, 900.0)],
        banks: vec![
            bank(INDICATOR_BANK, &[12, 14, 27], false, false),
            bank(BUZZER_BANK, &[13], false, false),
        ],
        buzzer: Some(OutputId::new(BUZZER_BANK, 1)),
        indicator: Some(IndicatorBands {
            metric: Metric::GasPpm,
            warning_above: 600.0,
            danger_above: 900.0,
        }),
        ..Profile::sensing(Variant::Gas, "arduino/gas", SensorFormat::Json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const ALL: [Variant; 6] = [
        Variant::LedButton,
        Variant::Climate,
        Variant::WaterLevel,
        Variant::LoadCell,
        Variant::Motion,
        Variant::Gas,
    ];

    #[test]
    fn every_profile_has_control_and_status() {
        for v in ALL {
            let p = v.profile();
            assert_eq!(p.variant, v);
            let chans: Vec<_> = p.topics.iter().map(|(c, _)| *c).collect();
            assert!(chans.contains(&Channel::Control), "{v}");
            assert!(chans.contains(&Channel::StatusResponse), "{v}");
        }
    }

    #[test]
    fn default_pins_are_unique_per_variant() {
        for v in ALL {
            let p = v.profile();
            let mut seen = HashSet::new();
            let pins = p
                .banks
                .iter()
                .flat_map(|b| b.pins.iter().copied())
                .chain(p.inputs.iter().map(|i| i.pin));
            for pin in pins {
                assert!(seen.insert(pin), "{v}: gpio {pin} used twice");
            }
        }
    }

    #[test]
    fn buzzer_and_indicator_outputs_exist_in_banks() {
        for v in ALL {
            let p = v.profile();
            let mut needed: Vec<OutputId> = p.buzzer.into_iter().collect();
            if p.indicator.is_some() {
                needed.extend(crate::indicator::Band::ALL.map(|b| b.output()));
            }
            for id in needed {
                assert!(
                    p.banks.iter().any(|b| b.name == id.bank && b.contains(id.index)),
                    "{v}: {id} has no pin"
                );
            }
        }
    }

    #[test]
    fn led_buttons_pair_with_both_colours() {
        let p = Variant::LedButton.profile();
        assert_eq!(p.inputs.len(), 5);
        assert_eq!(
            p.inputs[2].paired,
            vec![OutputId::new("ledGREEN", 3), OutputId::new("ledRED", 3)]
        );
        assert!(!p.samples());
    }

    #[test]
    fn climate_defaults() {
        let p = Variant::Climate.profile();
        assert_eq!(
            p.thresholds,
            vec![(Metric::Temperature, 30.0), (Metric::Humidity, 70.0)]
        );
        assert_eq!(p.alert_format, AlertFormat::Text);
        assert_eq!(p.sensor_format, Some(SensorFormat::Climate));
    }

    #[test]
    fn water_level_valves_need_activation() {
        let p = Variant::WaterLevel.profile();
        assert!(p.valves);
        assert!(p.announce_on_connect);
        assert!(p.banks[0].requires_activation);
        assert!(!p.banks[0].addressable);
        assert!(p.banks[0].relay);
    }

    #[test]
    fn only_valves_are_relays() {
        for v in [Variant::LedButton, Variant::Climate, Variant::Gas] {
            assert!(v.profile().banks.iter().all(|b| !b.relay), "{v}");
        }
    }

    #[test]
    fn variant_names_parse() {
        #[derive(Deserialize)]
        struct W {
            v: Variant,
        }
        for v in ALL {
            let w: W = toml::from_str(&format!("v = \"{}\"", v.name())).unwrap();
            assert_eq!(w.v, v);
        }
    }
}
