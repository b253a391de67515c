//! The node's control loop.
//!
//! [`Node::tick`] is one non-blocking pass over every component, in this
//! order:
//!
//! 1. connectivity: start a connection attempt if one is due
//! 2. inbound: dispatch every queued message, in arrival order
//! 3. inputs: debounce each button and react to confirmed transitions
//! 4. actuators: end timed pulses whose deadline has passed
//! 5. sampling: if active and the cadence is due, sample, publish, alert
//!
//! The caller owns the clock and the transport's event loop; the node only
//! ever sees `Instant`s and delivered messages. Nothing in here waits.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::activation::NodeContext;
use crate::actuator::{PulsePolicy, TimedActuator};
use crate::alerting::{AlertReport, AlertingEngine};
use crate::channels::{Channel, ChannelBindings};
use crate::commands::{Dispatcher, Effect};
use crate::connectivity::{ConnectivityManager, RetryPolicy, Transport};
use crate::debounce::Debouncer;
use crate::error::{LinkError, NodeError};
use crate::indicator::{Band, Indicator};
use crate::inputs::InputBoard;
use crate::mqtt::BrokerSettings;
use crate::outputs::{OutputBoard, OutputId};
use crate::sensor::{Sample, Sensor};
use crate::thresholds::ThresholdSet;
use crate::variant::Profile;

/// Everything a node needs to start, after config resolution.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub node_id: String,
    pub broker: BrokerSettings,
    pub retry: RetryPolicy,
    pub bindings: ChannelBindings,
    pub status_ack: String,
    pub tick_interval: Duration,
    pub buzzer_pulse: Duration,
    pub pulse_policy: PulsePolicy,
    pub debounce: Duration,
    pub active_low: bool,
    pub profile: Profile,
}

struct Button {
    debouncer: Debouncer,
    paired: Vec<OutputId>,
}

pub struct Node<T, S> {
    profile: Profile,
    ctx: NodeContext,
    dispatcher: Dispatcher,
    link: ConnectivityManager<T>,
    sensor: S,
    alerting: AlertingEngine,
    outputs: OutputBoard,
    inputs: InputBoard,
    buttons: Vec<Button>,
    buzzer: TimedActuator,
    buzzer_pulse: Duration,
    pulse_policy: PulsePolicy,
    indicator: Option<Indicator>,
    inbox: VecDeque<(String, Vec<u8>)>,
    last_sample: Option<Instant>,
}

impl<T: Transport, S: Sensor> Node<T, S> {
    /// Bring up the sensor and boards. Any failure here is terminal: the
    /// node never reaches its loop.
    pub fn new(settings: NodeSettings, transport: T, mut sensor: S) -> Result<Self, NodeError> {
        let NodeSettings {
            bindings,
            retry,
            status_ack,
            buzzer_pulse,
            pulse_policy,
            debounce,
            active_low,
            profile,
            ..
        } = settings;

        if profile.samples() {
            sensor.init()?;
        }
        let outputs = OutputBoard::new(&profile.banks, active_low)?;
        let input_pins: Vec<u8> = profile.inputs.iter().map(|i| i.pin).collect();
        let inputs = InputBoard::new(&input_pins)?;

        // Seed each debouncer with the level the pin reads right now so a
        // button held at boot does not fire.
        let buttons = profile
            .inputs
            .iter()
            .enumerate()
            .map(|(i, spec)| Button {
                debouncer: Debouncer::new(inputs.read(i), debounce),
                paired: spec.paired.clone(),
            })
            .collect();

        info!(
            variant = %profile.variant,
            outputs = outputs.ids().len(),
            inputs = inputs.len(),
            sample_ms = profile.sample_interval.as_millis() as u64,
            "node initialised"
        );

        Ok(Self {
            ctx: NodeContext::new(ThresholdSet::new(profile.thresholds.iter().copied())),
            dispatcher: Dispatcher::new(&profile.banks, profile.valves, status_ack),
            link: ConnectivityManager::new(transport, bindings, retry),
            sensor,
            alerting: AlertingEngine::new(profile.alert_format),
            outputs,
            inputs,
            buttons,
            buzzer: TimedActuator::default(),
            buzzer_pulse,
            pulse_policy,
            indicator: profile.indicator.map(Indicator::new),
            inbox: VecDeque::new(),
            last_sample: None,
            profile,
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn context(&self) -> &NodeContext {
        &self.ctx
    }

    pub fn link(&self) -> &ConnectivityManager<T> {
        &self.link
    }

    pub fn outputs(&self) -> &OutputBoard {
        &self.outputs
    }

    pub fn inputs_mut(&mut self) -> &mut InputBoard {
        &mut self.inputs
    }

    pub fn buzzer(&self) -> &TimedActuator {
        &self.buzzer
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }

    // -----------------------------------------------------------------------
    // Transport events
    // -----------------------------------------------------------------------

    /// Whether the caller should poll the transport's event loop.
    pub fn wants_io(&self) -> bool {
        self.link.wants_io()
    }

    pub fn link_up(&mut self, now: Instant) {
        self.link.on_connected(now);
        if self.profile.announce_on_connect {
            let ack = self.dispatcher.status_ack().to_string();
            self.publish(Channel::StatusResponse, &ack);
        }
    }

    pub fn link_down(&mut self, now: Instant, reason: &str) {
        self.link.on_disconnected(now, reason);
    }

    /// Queue an inbound message; it is handled on the next tick.
    pub fn deliver(&mut self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) {
        self.inbox.push_back((topic.into(), payload.into()));
    }

    // -----------------------------------------------------------------------
    // Loop
    // -----------------------------------------------------------------------

    pub fn tick(&mut self, now: Instant) {
        self.link.tick(now);
        self.drain_inbox();
        self.poll_inputs(now);
        if self.buzzer.tick(now) {
            self.set_buzzer(false);
        }
        if self.ctx.is_active() {
            self.sample_if_due(now);
        }
    }

    /// Drive every output off before exit.
    pub fn shutdown(&mut self) {
        self.buzzer.clear();
        self.outputs.all_off();
        info!("node stopped, outputs off");
    }

    fn drain_inbox(&mut self) {
        while let Some((topic, payload)) = self.inbox.pop_front() {
            let Some(channel) = self.link.bindings().channel_for(&topic) else {
                debug!(%topic, "message on unbound topic ignored");
                continue;
            };
            let effects = self.dispatcher.dispatch(&mut self.ctx, channel, &payload);
            for effect in effects {
                self.apply(effect);
            }
        }
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Publish { channel, payload } => self.publish(channel, &payload),
            Effect::SetOutput { id, on } => {
                self.outputs.set(id, on);
            }
            Effect::SafeState => self.enter_safe_state(),
        }
    }

    fn enter_safe_state(&mut self) {
        let spared = match self.pulse_policy {
            PulsePolicy::RunToCompletion if self.buzzer.is_active() => self.profile.buzzer,
            PulsePolicy::RunToCompletion => None,
            PulsePolicy::ClearOnDeactivate => {
                self.buzzer.clear();
                None
            }
        };
        self.outputs.all_off_except(spared);
        if let Some(ind) = &mut self.indicator {
            ind.reset();
        }
        info!(pulse_policy = ?self.pulse_policy, "outputs driven to safe state");
    }

    fn poll_inputs(&mut self, now: Instant) {
        for i in 0..self.buttons.len() {
            let raw = self.inputs.read(i);
            let Some(transition) = self.buttons[i].debouncer.update(now, raw) else {
                continue;
            };
            // Debouncing runs regardless; reactions only while active.
            if !self.ctx.is_active() {
                continue;
            }
            // Active-low: a low level is a press.
            let pressed = !transition.to;
            let event = format!("leds{} {}", i + 1, if pressed { "ON" } else { "OFF" });
            debug!(button = i + 1, pressed, "button");
            for id in self.buttons[i].paired.clone() {
                self.outputs.set(id, pressed);
            }
            self.publish(Channel::InputEvents, &event);
        }
    }

    fn sample_if_due(&mut self, now: Instant) {
        if !self.profile.samples() {
            return;
        }
        if self
            .last_sample
            .is_some_and(|at| now.saturating_duration_since(at) < self.profile.sample_interval)
        {
            return;
        }
        self.last_sample = Some(now);

        let sample = match self.sensor.sample().and_then(Sample::validate) {
            Ok(s) => s,
            Err(e) => {
                warn!("sample skipped: {e}");
                return;
            }
        };

        if let Some(format) = self.profile.sensor_format {
            let payload = format.render(&sample);
            self.publish(Channel::SensorData, &payload);
        }

        self.update_indicator(&sample);

        if let Some(report) = self.alerting.evaluate(now, &sample, self.ctx.thresholds()) {
            self.raise(now, &report);
        }
    }

    fn raise(&mut self, now: Instant, report: &AlertReport) {
        for e in &report.events {
            warn!(metric = %e.metric, observed = e.observed, limit = e.limit, "over threshold");
        }
        if let Some(payload) = &report.payload {
            self.publish(Channel::Alert, payload);
        }
        if self.buzzer.trigger(now, self.buzzer_pulse) {
            self.set_buzzer(true);
        }
    }

    fn update_indicator(&mut self, sample: &Sample) {
        let Some(ind) = &mut self.indicator else {
            return;
        };
        let Some(value) = sample.get(ind.metric()) else {
            return;
        };
        if let Some(band) = ind.update(value) {
            debug!(?band, value, "indicator");
            for b in Band::ALL {
                self.outputs.set(b.output(), b == band);
            }
        }
    }

    fn set_buzzer(&mut self, on: bool) {
        if let Some(id) = self.profile.buzzer {
            self.outputs.set(id, on);
        }
    }

    fn publish(&mut self, channel: Channel, payload: &str) {
        match self.link.publish(channel, payload) {
            Ok(()) => debug!(%channel, %payload, "published"),
            Err(LinkError::NotConnected) => debug!(%channel, "not connected, message dropped"),
            Err(e) => warn!(%channel, "publish failed: {e}"),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
