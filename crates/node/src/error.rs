//! Error types for the node runtime.
//!
//! Only [`NodeError`] is fatal, and only at startup. Everything else is
//! handled where it happens and logged.

use crate::channels::Channel;
use crate::sensor::Metric;

/// Outbound transport failures. Never fatal: the message is dropped.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Publish attempted while the broker connection is down.
    #[error("transport not connected")]
    NotConnected,

    /// No topic is bound to the logical channel on this node.
    #[error("no topic bound for channel '{0}'")]
    Unbound(Channel),

    /// The underlying client refused the request (queue full, closed).
    #[error("transport rejected request: {0}")]
    Transport(String),
}

/// Inbound payloads that were recognised but could not be acted upon.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,

    #[error("malformed threshold payload")]
    MalformedThresholds(#[source] serde_json::Error),

    #[error("threshold payload must be a flat JSON object")]
    ThresholdsNotObject,

    #[error("unknown output '{bank}{index}'")]
    UnknownOutput { bank: &'static str, index: String },
}

/// Faults reported by the sensor collaborator.
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    /// Raised by `Sensor::init` only.
    #[error("sensor failed to initialise: {0}")]
    Init(String),

    #[error("invalid {0} reading")]
    InvalidReading(Metric),
}

/// Startup-only faults. A node that hits one of these never enters its
/// control loop.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("sensor initialisation failed")]
    Sensor(#[from] SensorError),

    #[error("board initialisation failed: {0}")]
    Board(String),
}
