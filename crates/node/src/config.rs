//! TOML config file loading, validation, and resolution into the settings
//! the node runs with.
//!
//! Every section is optional. A missing file means "variant defaults";
//! `MQTT_HOST`, `MQTT_PORT` and `NODE_ID` override the file.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::actuator::PulsePolicy;
use crate::channels::{Channel, ChannelBindings};
use crate::connectivity::RetryPolicy;
use crate::control::NodeSettings;
use crate::debounce::DEFAULT_SETTLE;
use crate::mqtt::{self, BrokerSettings};
use crate::sensor::Metric;
use crate::variant::{Profile, Variant};

pub const DEFAULT_STATUS_ACK: &str = "Board : ESP32 Status : Connected";

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeSection,
    pub mqtt: MqttSection,
    pub topics: TopicSection,
    /// Initial limits keyed by wire name (`temp`, `gas_ppm`, ...). A key
    /// the profile has no default for adds a new slot.
    pub thresholds: BTreeMap<String, f64>,
    pub actuation: ActuationSection,
    pub pins: PinSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    pub variant: Variant,
    pub node_id: String,
    /// Overrides the profile's cadence.
    pub sample_interval_ms: Option<u64>,
    pub tick_interval_ms: u64,
    pub status_ack: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            variant: Variant::default(),
            node_id: "node-a".into(),
            sample_interval_ms: None,
            tick_interval_ms: 10,
            status_ack: DEFAULT_STATUS_ACK.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MqttSection {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub retry_interval_ms: u64,
    pub backoff: Option<BackoffSection>,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 1883,
            username: None,
            password: None,
            keep_alive_secs: 30,
            retry_interval_ms: 5000,
            backoff: None,
        }
    }
}

/// Opt-in doubling delay, starting at `retry_interval_ms`.
#[derive(Debug, Deserialize)]
pub struct BackoffSection {
    pub max_interval_ms: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TopicSection {
    pub control: Option<String>,
    pub status_response: Option<String>,
    pub actuator_control: Option<String>,
    pub input_events: Option<String>,
    pub sensor_data: Option<String>,
    pub threshold_config: Option<String>,
    pub alert: Option<String>,
}

impl TopicSection {
    fn get(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Control => self.control.as_deref(),
            Channel::StatusResponse => self.status_response.as_deref(),
            Channel::ActuatorControl => self.actuator_control.as_deref(),
            Channel::InputEvents => self.input_events.as_deref(),
            Channel::SensorData => self.sensor_data.as_deref(),
            Channel::ThresholdConfig => self.threshold_config.as_deref(),
            Channel::Alert => self.alert.as_deref(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ActuationSection {
    pub buzzer_ms: u64,
    pub pulse_policy: PulsePolicy,
    pub debounce_ms: u64,
    /// Relay boards that switch on a low level. Only relay banks (the
    /// valves) are inverted; LEDs and buzzers stay active-high.
    pub active_low: bool,
}

impl Default for ActuationSection {
    fn default() -> Self {
        Self {
            buzzer_ms: 500,
            pulse_policy: PulsePolicy::default(),
            debounce_ms: DEFAULT_SETTLE.as_millis() as u64,
            active_low: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PinSection {
    /// Bank name → pins for index 1, 2, ...
    pub outputs: BTreeMap<String, Vec<u8>>,
    /// Button pins in order.
    pub inputs: Option<Vec<u8>>,
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins on the 40-pin header that are free for general use.
/// GPIO 0-1 belong to the ID EEPROM.
const VALID_GPIO_PINS: std::ops::RangeInclusive<u8> = 2..=27;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate the whole file. Returns an error describing every violation
    /// found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_node(&mut errors);
        self.validate_mqtt(&mut errors);
        self.validate_topics(&mut errors);
        self.validate_thresholds(&mut errors);
        self.validate_actuation(&mut errors);
        self.validate_pins(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_node(&self, errors: &mut Vec<String>) {
        let n = &self.node;
        if n.node_id.trim().is_empty() {
            errors.push("node.node_id is empty".into());
        }
        if n.sample_interval_ms == Some(0) {
            errors.push("node.sample_interval_ms must be positive".into());
        }
        if n.tick_interval_ms == 0 {
            errors.push("node.tick_interval_ms must be positive".into());
        }
        if n.status_ack.is_empty() {
            errors.push("node.status_ack is empty".into());
        }
    }

    fn validate_mqtt(&self, errors: &mut Vec<String>) {
        let m = &self.mqtt;
        if m.host.trim().is_empty() {
            errors.push("mqtt.host is empty".into());
        }
        if m.port == 0 {
            errors.push("mqtt.port must be positive".into());
        }
        if m.keep_alive_secs < 5 {
            errors.push(format!(
                "mqtt.keep_alive_secs must be at least 5, got {}",
                m.keep_alive_secs
            ));
        }
        if m.retry_interval_ms == 0 {
            errors.push("mqtt.retry_interval_ms must be positive".into());
        }
        if let Some(b) = &m.backoff {
            if b.max_interval_ms < m.retry_interval_ms {
                errors.push(format!(
                    "mqtt.backoff.max_interval_ms ({}) is below retry_interval_ms ({})",
                    b.max_interval_ms, m.retry_interval_ms
                ));
            }
        }
        if m.username.is_some() != m.password.is_some() {
            errors.push("mqtt.username and mqtt.password must be set together".into());
        }
    }

    fn validate_topics(&self, errors: &mut Vec<String>) {
        for channel in Channel::ALL {
            if let Some(topic) = self.topics.get(channel) {
                if topic.trim().is_empty() {
                    errors.push(format!("topics.{}: topic is empty", channel.name()));
                } else if topic.contains(['+', '#']) {
                    errors.push(format!(
                        "topics.{}: wildcards are not allowed in '{topic}'",
                        channel.name()
                    ));
                }
            }
        }
    }

    fn validate_thresholds(&self, errors: &mut Vec<String>) {
        for (key, limit) in &self.thresholds {
            if Metric::from_key(key).is_none() {
                errors.push(format!("thresholds.{key}: unknown metric"));
            }
            if !limit.is_finite() {
                errors.push(format!("thresholds.{key}: limit must be finite"));
            }
        }
    }

    fn validate_actuation(&self, errors: &mut Vec<String>) {
        let a = &self.actuation;
        if a.buzzer_ms == 0 {
            errors.push("actuation.buzzer_ms must be positive".into());
        }
        if a.debounce_ms == 0 {
            errors.push("actuation.debounce_ms must be positive".into());
        }
    }

    fn validate_pins(&self, errors: &mut Vec<String>) {
        let profile = self.node.variant.profile();
        for name in self.pins.outputs.keys() {
            if !profile.banks.iter().any(|b| b.name == name) {
                errors.push(format!(
                    "pins.outputs.{name}: no such bank on a {} node",
                    self.node.variant
                ));
            }
        }
        for b in &profile.banks {
            if let Some(pins) = self.pins.outputs.get(b.name) {
                if pins.len() != b.pins.len() {
                    errors.push(format!(
                        "pins.outputs.{}: expected {} pins, got {}",
                        b.name,
                        b.pins.len(),
                        pins.len()
                    ));
                }
            }
        }
        if let Some(inputs) = &self.pins.inputs {
            if inputs.len() != profile.inputs.len() {
                errors.push(format!(
                    "pins.inputs: expected {} pins, got {}",
                    profile.inputs.len(),
                    inputs.len()
                ));
            }
        }

        // Whitelist and uniqueness over the effective table.
        let mut seen: HashSet<u8> = HashSet::new();
        for (owner, pin) in effective_pins(&profile, &self.pins) {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "{owner}: gpio {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            } else if !seen.insert(pin) {
                errors.push(format!("{owner}: gpio {pin} is already in use"));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Env overrides
    // -----------------------------------------------------------------------

    /// Apply `MQTT_HOST`, `MQTT_PORT` and `NODE_ID` from `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            self.mqtt.port = port
                .parse()
                .with_context(|| format!("MQTT_PORT is not a port number: {port}"))?;
        }
        if let Some(id) = lookup("NODE_ID") {
            self.node.node_id = id;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    /// Merge the file over the variant profile. Call after `validate`.
    pub fn resolve(&self) -> NodeSettings {
        let mut profile = self.node.variant.profile();

        for bank in &mut profile.banks {
            if let Some(pins) = self.pins.outputs.get(bank.name) {
                bank.pins.clone_from(pins);
            }
        }
        if let Some(pins) = &self.pins.inputs {
            for (input, pin) in profile.inputs.iter_mut().zip(pins) {
                input.pin = *pin;
            }
        }
        for (key, limit) in &self.thresholds {
            let Some(metric) = Metric::from_key(key) else {
                continue;
            };
            match profile.thresholds.iter_mut().find(|(m, _)| *m == metric) {
                Some(slot) => slot.1 = *limit,
                None => profile.thresholds.push((metric, *limit)),
            }
        }
        if let Some(ms) = self.node.sample_interval_ms {
            profile.sample_interval = Duration::from_millis(ms);
        }

        let bindings = ChannelBindings::new(profile.topics.iter().map(|&(channel, default)| {
            (channel, self.topics.get(channel).unwrap_or(default).to_string())
        }));

        let retry_interval = Duration::from_millis(self.mqtt.retry_interval_ms);
        let retry = match &self.mqtt.backoff {
            None => RetryPolicy::Fixed(retry_interval),
            Some(b) => RetryPolicy::Backoff {
                initial: retry_interval,
                max: Duration::from_millis(b.max_interval_ms),
            },
        };

        let credentials = match (&self.mqtt.username, &self.mqtt.password) {
            (Some(u), Some(p)) => Some((u.clone(), p.clone())),
            _ => None,
        };

        NodeSettings {
            node_id: self.node.node_id.clone(),
            broker: BrokerSettings {
                host: self.mqtt.host.clone(),
                port: self.mqtt.port,
                client_id: mqtt::client_id(&self.node.node_id),
                keep_alive: Duration::from_secs(self.mqtt.keep_alive_secs),
                credentials,
            },
            retry,
            bindings,
            status_ack: self.node.status_ack.clone(),
            tick_interval: Duration::from_millis(self.node.tick_interval_ms),
            buzzer_pulse: Duration::from_millis(self.actuation.buzzer_ms),
            pulse_policy: self.actuation.pulse_policy,
            debounce: Duration::from_millis(self.actuation.debounce_ms),
            active_low: self.actuation.active_low,
            profile,
        }
    }
}

/// Every pin the node will claim, labelled for error messages.
fn effective_pins(profile: &Profile, pins: &PinSection) -> Vec<(String, u8)> {
    let mut out = Vec::new();
    for b in &profile.banks {
        let list = pins.outputs.get(b.name).unwrap_or(&b.pins);
        for (i, pin) in list.iter().enumerate() {
            out.push((format!("output {}{}", b.name, i + 1), *pin));
        }
    }
    let inputs: Vec<u8> = match &pins.inputs {
        Some(list) => list.clone(),
        None => profile.inputs.iter().map(|i| i.pin).collect(),
    };
    for (i, pin) in inputs.into_iter().enumerate() {
        out.push((format!("input {}", i + 1), pin));
    }
    out
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read and parse a TOML config file. A missing file yields the defaults
/// for the default variant. Validation is left to the caller so env
/// overrides can fill in values first.
pub fn load(path: &str) -> Result<Config> {
    if !Path::new(path).exists() {
        tracing::info!(%path, "no config file, using defaults");
        return Ok(Config::default());
    }
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::AlertFormat;
    use crate::outputs::OutputId;

    fn parse(s: &str) -> Config {
        toml::from_str(s).unwrap()
    }

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_empty_config() {
        let cfg = parse("");
        assert_eq!(cfg.node.variant, Variant::Climate);
        assert_eq!(cfg.node.node_id, "node-a");
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.actuation.buzzer_ms, 500);
        assert_eq!(cfg.actuation.debounce_ms, 50);
        cfg.validate().unwrap();
    }

    #[test]
    fn parse_full_config() {
        let cfg = parse(
            r#"
[node]
variant = "gas"
node_id = "kitchen"
sample_interval_ms = 2000

[mqtt]
host = "broker.local"
port = 8883
username = "node"
password = "secret"
retry_interval_ms = 1000

[mqtt.backoff]
max_interval_ms = 30000

[topics]
alert = "kitchen/alerts"

[thresholds]
gas_ppm = 750.0

[actuation]
buzzer_ms = 250
pulse_policy = "clear_on_deactivate"

[pins.outputs]
buzzer = [20]
"#,
        );
        cfg.validate().unwrap();
        assert_eq!(cfg.node.variant, Variant::Gas);
        assert_eq!(cfg.actuation.pulse_policy, PulsePolicy::ClearOnDeactivate);
        assert_eq!(cfg.mqtt.backoff.as_ref().unwrap().max_interval_ms, 30000);
    }

    #[test]
    fn unknown_variant_fails_to_parse() {
        assert!(toml::from_str::<Config>("[node]\nvariant = \"toaster\"").is_err());
    }

    // -- Validation -------------------------------------------------------

    #[test]
    fn empty_node_id_rejected() {
        let cfg = parse("[node]\nnode_id = \" \"");
        assert_validation_err(&cfg, "node.node_id is empty");
    }

    #[test]
    fn zero_intervals_rejected() {
        let cfg = parse(
            "[node]\nsample_interval_ms = 0\ntick_interval_ms = 0\n[mqtt]\nretry_interval_ms = 0",
        );
        assert_validation_err(&cfg, "sample_interval_ms must be positive");
        assert_validation_err(&cfg, "tick_interval_ms must be positive");
        assert_validation_err(&cfg, "retry_interval_ms must be positive");
    }

    #[test]
    fn all_errors_are_reported() {
        let cfg = parse("[node]\nnode_id = \"\"\n[actuation]\nbuzzer_ms = 0\ndebounce_ms = 0");
        assert_validation_err(&cfg, "3 errors");
    }

    #[test]
    fn backoff_below_interval_rejected() {
        let cfg = parse("[mqtt]\nretry_interval_ms = 5000\n[mqtt.backoff]\nmax_interval_ms = 100");
        assert_validation_err(&cfg, "below retry_interval_ms");
    }

    #[test]
    fn half_credentials_rejected() {
        let cfg = parse("[mqtt]\nusername = \"u\"");
        assert_validation_err(&cfg, "must be set together");
    }

    #[test]
    fn empty_topic_rejected() {
        let cfg = parse("[topics]\nsensor_data = \"\"");
        assert_validation_err(&cfg, "topics.sensor_data: topic is empty");
    }

    #[test]
    fn wildcard_topic_rejected() {
        let cfg = parse("[topics]\ncontrol = \"mqtt/#\"");
        assert_validation_err(&cfg, "wildcards are not allowed");
    }

    #[test]
    fn unknown_threshold_rejected() {
        let cfg = parse("[thresholds]\npressure = 1013.0");
        assert_validation_err(&cfg, "thresholds.pressure: unknown metric");
    }

    #[test]
    fn non_finite_threshold_rejected() {
        let cfg = parse("[thresholds]\ntemp = nan");
        assert_validation_err(&cfg, "limit must be finite");
    }

    #[test]
    fn unknown_bank_rejected() {
        let cfg = parse("[pins.outputs]\nvalve = [20, 21]");
        assert_validation_err(&cfg, "no such bank on a climate node");
    }

    #[test]
    fn wrong_pin_count_rejected() {
        let cfg = parse("[node]\nvariant = \"led_button\"\n[pins]\ninputs = [6, 13]");
        assert_validation_err(&cfg, "pins.inputs: expected 5 pins, got 2");
    }

    #[test]
    fn reserved_gpio_rejected() {
        let cfg = parse("[pins.outputs]\nbuzzer = [1]");
        assert_validation_err(&cfg, "not a valid BCM GPIO pin");
    }

    #[test]
    fn duplicate_pin_rejected() {
        // Button 1 moved onto red LED 1's pin.
        let cfg = parse(
            "[node]\nvariant = \"led_button\"\n[pins]\ninputs = [2, 14, 27, 26, 25]",
        );
        assert_validation_err(&cfg, "gpio 2 is already in use");
    }

    // -- Env --------------------------------------------------------------

    #[test]
    fn env_overrides_broker_and_identity() {
        let mut cfg = Config::default();
        cfg.apply_env(|k| match k {
            "MQTT_HOST" => Some("10.0.0.5".into()),
            "MQTT_PORT" => Some("1884".into()),
            "NODE_ID" => Some("tank".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.mqtt.host, "10.0.0.5");
        assert_eq!(cfg.mqtt.port, 1884);
        assert_eq!(cfg.node.node_id, "tank");
    }

    #[test]
    fn env_bad_port_is_error() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_env(|k| (k == "MQTT_PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("MQTT_PORT"));
    }

    // -- Resolve ----------------------------------------------------------

    #[test]
    fn resolve_defaults_follow_profile() {
        let s = Config::default().resolve();
        assert_eq!(s.profile.variant, Variant::Climate);
        assert_eq!(s.bindings.topic(Channel::SensorData), Some("arduino/Weather"));
        assert_eq!(s.retry, RetryPolicy::Fixed(Duration::from_secs(5)));
        assert_eq!(s.broker.client_id, "iot-node-node-a");
        assert_eq!(s.buzzer_pulse, Duration::from_millis(500));
        assert_eq!(s.profile.alert_format, AlertFormat::Text);
    }

    #[test]
    fn resolve_applies_overrides() {
        let cfg = parse(
            r#"
[node]
variant = "gas"
sample_interval_ms = 2000
[mqtt]
retry_interval_ms = 1000
[mqtt.backoff]
max_interval_ms = 8000
[topics]
alert = "kitchen/alerts"
[thresholds]
gas_ppm = 750.0
[pins.outputs]
buzzer = [20]
"#,
        );
        let s = cfg.resolve();
        assert_eq!(s.bindings.topic(Channel::Alert), Some("kitchen/alerts"));
        assert_eq!(s.bindings.topic(Channel::SensorData), Some("arduino/gas"));
        assert_eq!(s.profile.thresholds, vec![(Metric::GasPpm, 750.0)]);
        assert_eq!(s.profile.sample_interval, Duration::from_millis(2000));
        assert_eq!(
            s.retry,
            RetryPolicy::Backoff {
                initial: Duration::from_millis(1000),
                max: Duration::from_millis(8000),
            }
        );
        let buzzer = s.profile.banks.iter().find(|b| b.name == "buzzer").unwrap();
        assert_eq!(buzzer.pins, vec![20]);
    }

    #[test]
    fn resolve_threshold_adds_slot() {
        let cfg = parse("[node]\nvariant = \"load_cell\"\n[thresholds]\nload = 5.0");
        let s = cfg.resolve();
        assert_eq!(s.profile.thresholds, vec![(Metric::Load, 5.0)]);
    }

    #[test]
    fn resolve_input_pins_keep_pairing() {
        let cfg = parse(
            "[node]\nvariant = \"led_button\"\n[pins]\ninputs = [6, 7, 8, 9, 10]",
        );
        let s = cfg.resolve();
        assert_eq!(s.profile.inputs[0].pin, 6);
        assert_eq!(
            s.profile.inputs[0].paired,
            vec![OutputId::new("ledGREEN", 1), OutputId::new("ledRED", 1)]
        );
    }

    // -- Load -------------------------------------------------------------

    fn write_config(name: &str, contents: &str) -> String {
        let path = std::env::temp_dir().join(format!("iot-node-{}-{name}.toml", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let cfg = load("/nonexistent/iot-node.toml").unwrap();
        assert_eq!(cfg.node.variant, Variant::Climate);
    }

    #[test]
    fn env_fills_blank_node_id_from_file() {
        let path = write_config("fleet", "[node]\nvariant = \"gas\"\nnode_id = \"\"\n");
        let mut cfg = load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_validation_err(&cfg, "node.node_id is empty");

        cfg.apply_env(|k| (k == "NODE_ID").then(|| "node-7".to_string()))
            .unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.resolve().broker.client_id, "iot-node-node-7");
    }

    #[test]
    fn load_reports_parse_errors() {
        let path = write_config("broken", "[node\nvariant = ");
        let err = load(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(format!("{err:#}").contains("failed to parse config"));
    }
}
