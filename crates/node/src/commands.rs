//! Inbound command vocabulary.
//!
//! Handling is split in two: [`Dispatcher::parse`] turns a raw
//! (channel, payload) pair into a [`Command`] without touching any state,
//! and [`Dispatcher::apply`] runs it against the [`NodeContext`], returning
//! the side effects for the control loop to carry out. This module is the
//! only writer of the activation gate and the threshold set.
//!
//! | channel           | payload                                   | command                    |
//! |-------------------|-------------------------------------------|----------------------------|
//! | control           | `TurnOFF`                                 | `Deactivate`               |
//! | control           | `status_request`                          | `ActivateViaStatusRequest` |
//! | actuator-control  | `<bank><N>_ON` / `<bank><N>_OFF`          | `SetOutput`                |
//! | actuator-control  | `FILL_ON DRAIN_OFF`, `FILL_OFF DRAIN_ON`, `FILL_DRAIN_OFF` | `Valve`   |
//! | threshold-config  | flat JSON object                          | `UpdateThresholds`         |
//!
//! Anything else parses to `None` and is dropped without a diagnostic.

use tracing::{debug, info, warn};

use crate::activation::{GateTransition, NodeContext};
use crate::channels::Channel;
use crate::error::CommandError;
use crate::outputs::{OutputBank, OutputId};
use crate::thresholds::ThresholdUpdate;

/// Relay bank for fill/drain valves: index 1 = fill, 2 = drain.
pub const VALVE_BANK: &str = "valve";
pub const FILL_VALVE: OutputId = OutputId::new(VALVE_BANK, 1);
pub const DRAIN_VALVE: OutputId = OutputId::new(VALVE_BANK, 2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveVerb {
    /// `FILL_ON DRAIN_OFF`
    Fill,
    /// `FILL_OFF DRAIN_ON`
    Drain,
    /// `FILL_DRAIN_OFF`
    Close,
}

impl ValveVerb {
    pub fn parse(payload: &str) -> Option<Self> {
        match payload {
            "FILL_ON DRAIN_OFF" => Some(Self::Fill),
            "FILL_OFF DRAIN_ON" => Some(Self::Drain),
            "FILL_DRAIN_OFF" => Some(Self::Close),
            _ => None,
        }
    }

    /// (fill, drain) relay states.
    pub fn levels(self) -> (bool, bool) {
        match self {
            Self::Fill => (true, false),
            Self::Drain => (false, true),
            Self::Close => (false, false),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Deactivate,
    ActivateViaStatusRequest,
    SetOutput { id: OutputId, on: bool },
    Valve(ValveVerb),
    UpdateThresholds(ThresholdUpdate),
}

/// Work the control loop performs after a command was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Publish { channel: Channel, payload: String },
    SetOutput { id: OutputId, on: bool },
    /// Drive actuators to their safe (off) state.
    SafeState,
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    /// Addressable banks, longest name first so that a bank whose name is
    /// a prefix of another never shadows it.
    banks: Vec<OutputBank>,
    valves: bool,
    status_ack: String,
}

impl Dispatcher {
    pub fn new(banks: &[OutputBank], valves: bool, status_ack: impl Into<String>) -> Self {
        let mut banks: Vec<OutputBank> = banks.iter().filter(|b| b.addressable).cloned().collect();
        banks.sort_by(|a, b| b.name.len().cmp(&a.name.len()));
        Self {
            banks,
            valves,
            status_ack: status_ack.into(),
        }
    }

    pub fn status_ack(&self) -> &str {
        &self.status_ack
    }

    /// Interpret a payload. `Ok(None)` means "not for us".
    pub fn parse(&self, channel: Channel, payload: &[u8]) -> Result<Option<Command>, CommandError> {
        let text = std::str::from_utf8(payload).map_err(|_| CommandError::NotUtf8)?;
        match channel {
            Channel::Control => Ok(match text {
                "TurnOFF" => Some(Command::Deactivate),
                "status_request" => Some(Command::ActivateViaStatusRequest),
                _ => None,
            }),
            Channel::ActuatorControl => {
                if self.valves {
                    if let Some(verb) = ValveVerb::parse(text) {
                        return Ok(Some(Command::Valve(verb)));
                    }
                }
                self.parse_output(text)
            }
            Channel::ThresholdConfig => {
                ThresholdUpdate::parse(text).map(|u| Some(Command::UpdateThresholds(u)))
            }
            _ => Ok(None),
        }
    }

    fn parse_output(&self, text: &str) -> Result<Option<Command>, CommandError> {
        let (head, on) = if let Some(head) = text.strip_suffix("_ON") {
            (head, true)
        } else if let Some(head) = text.strip_suffix("_OFF") {
            (head, false)
        } else {
            return Ok(None);
        };

        let Some((bank, index)) = self
            .banks
            .iter()
            .find_map(|b| head.strip_prefix(b.name).map(|rest| (b, rest)))
        else {
            return Ok(None);
        };

        // Exactly one decimal digit: `ledRED1_ON`, never `ledRED01_ON`.
        let digit = match index.as_bytes() {
            [d] if d.is_ascii_digit() => Some(d - b'0'),
            _ => None,
        };
        match digit {
            Some(i) if bank.contains(i) => Ok(Some(Command::SetOutput {
                id: OutputId::new(bank.name, i),
                on,
            })),
            _ => Err(CommandError::UnknownOutput {
                bank: bank.name,
                index: index.to_string(),
            }),
        }
    }

    fn requires_activation(&self, id: OutputId) -> bool {
        self.banks
            .iter()
            .find(|b| b.name == id.bank)
            .map_or(true, |b| b.requires_activation)
    }

    /// Run a command against the context.
    pub fn apply(&self, ctx: &mut NodeContext, cmd: Command) -> Vec<Effect> {
        match cmd {
            Command::Deactivate => match ctx.gate_mut().set_active(false) {
                GateTransition::Deactivated => vec![Effect::SafeState],
                _ => Vec::new(),
            },
            Command::ActivateViaStatusRequest => {
                ctx.gate_mut().set_active(true);
                vec![Effect::Publish {
                    channel: Channel::StatusResponse,
                    payload: self.status_ack.clone(),
                }]
            }
            Command::SetOutput { id, on } => {
                if self.requires_activation(id) && !ctx.is_active() {
                    debug!(output = %id, "output command ignored while inactive");
                    return Vec::new();
                }
                vec![Effect::SetOutput { id, on }]
            }
            Command::Valve(verb) => {
                if !ctx.is_active() {
                    debug!(?verb, "valve command ignored while inactive");
                    return Vec::new();
                }
                let (fill, drain) = verb.levels();
                info!(?verb, "valves");
                vec![
                    Effect::SetOutput {
                        id: FILL_VALVE,
                        on: fill,
                    },
                    Effect::SetOutput {
                        id: DRAIN_VALVE,
                        on: drain,
                    },
                ]
            }
            Command::UpdateThresholds(update) => {
                for r in &update.rejected {
                    warn!(field = %r.key, reason = r.reason, "threshold field rejected");
                }
                ctx.thresholds_mut().apply(&update);
                Vec::new()
            }
        }
    }

    /// Parse and apply in one step. Failures are logged and produce no
    /// effects; they never reach the caller.
    pub fn dispatch(&self, ctx: &mut NodeContext, channel: Channel, payload: &[u8]) -> Vec<Effect> {
        match self.parse(channel, payload) {
            Ok(Some(cmd)) => {
                debug!(%channel, ?cmd, "command");
                self.apply(ctx, cmd)
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(%channel, "command rejected: {e}");
                Vec::new()
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
