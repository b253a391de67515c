//! Logical channels and their binding to broker topics.
//!
//! Bindings are fixed at startup. Inbound topics are resolved back to a
//! channel here; command interpretation happens in [`crate::commands`].

use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Channel vocabulary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// A named publish/subscribe endpoint, independent of the topic string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    /// `TurnOFF` / `status_request`.
    Control,
    /// Fixed acknowledgment of a status request.
    StatusResponse,
    /// Discrete output and valve commands.
    ActuatorControl,
    /// Debounced button transitions.
    InputEvents,
    /// One message per sampling cycle.
    SensorData,
    /// Flat JSON threshold updates.
    ThresholdConfig,
    /// Over-threshold reports.
    Alert,
}

impl Channel {
    pub const ALL: [Channel; 7] = [
        Self::Control,
        Self::StatusResponse,
        Self::ActuatorControl,
        Self::InputEvents,
        Self::SensorData,
        Self::ThresholdConfig,
        Self::Alert,
    ];

    pub fn direction(self) -> Direction {
        match self {
            Self::Control | Self::ActuatorControl | Self::ThresholdConfig => Direction::Inbound,
            Self::StatusResponse | Self::InputEvents | Self::SensorData | Self::Alert => {
                Direction::Outbound
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::StatusResponse => "status_response",
            Self::ActuatorControl => "actuator_control",
            Self::InputEvents => "input_events",
            Self::SensorData => "sensor_data",
            Self::ThresholdConfig => "threshold_config",
            Self::Alert => "alert",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

/// Immutable channel → topic table. Channels a node does not use are simply
/// absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelBindings {
    topics: BTreeMap<Channel, String>,
}

impl ChannelBindings {
    pub fn new<I, S>(bindings: I) -> Self
    where
        I: IntoIterator<Item = (Channel, S)>,
        S: Into<String>,
    {
        Self {
            topics: bindings
                .into_iter()
                .map(|(ch, topic)| (ch, topic.into()))
                .collect(),
        }
    }

    pub fn topic(&self, channel: Channel) -> Option<&str> {
        self.topics.get(&channel).map(String::as_str)
    }

    /// Resolve an inbound topic to its channel. Outbound channels never
    /// match, so a node that shares a topic between an inbound and an
    /// outbound channel does not dispatch its own publications.
    pub fn channel_for(&self, topic: &str) -> Option<Channel> {
        self.topics
            .iter()
            .find(|(ch, t)| ch.direction() == Direction::Inbound && t.as_str() == topic)
            .map(|(ch, _)| *ch)
    }

    /// Topics to (re)subscribe after every successful connection.
    pub fn subscriptions(&self) -> Vec<&str> {
        let mut topics: Vec<&str> = Vec::new();
        for (ch, t) in &self.topics {
            if ch.direction() == Direction::Inbound && !topics.contains(&t.as_str()) {
                topics.push(t.as_str());
            }
        }
        topics
    }

    pub fn iter(&self) -> impl Iterator<Item = (Channel, &str)> {
        self.topics.iter().map(|(ch, t)| (*ch, t.as_str()))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
