//! Fire-and-forget timed outputs (buzzer beeps, relay pulses).
//!
//! ```text
//! Idle ──[trigger]──▶ Pulsing{start, duration} ──[now >= start + duration]──▶ Idle
//!                        │  ▲
//!                        └──┘ trigger while pulsing: ignored
//! ```
//!
//! The tracker owns no pin. The control loop drives the output on when
//! `trigger` returns `true` and off when `tick` returns `true`.

use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;

/// What happens to an in-flight pulse when the node is deactivated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PulsePolicy {
    /// The pulse keeps its original deadline; ticks continue while inactive.
    #[default]
    RunToCompletion,
    /// The pulse is dropped and the output forced off with everything else.
    ClearOnDeactivate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pulse {
    start: Instant,
    duration: Duration,
}

#[derive(Debug, Default)]
pub struct TimedActuator {
    pulse: Option<Pulse>,
}

impl TimedActuator {
    pub fn is_active(&self) -> bool {
        self.pulse.is_some()
    }

    /// Deadline of the in-flight pulse.
    pub fn deadline(&self) -> Option<Instant> {
        self.pulse.map(|p| p.start + p.duration)
    }

    /// Start a pulse unless one is already running. The first trigger wins;
    /// later ones neither restart nor extend it. Returns `true` if a pulse
    /// was started.
    pub fn trigger(&mut self, now: Instant, duration: Duration) -> bool {
        if self.pulse.is_some() {
            return false;
        }
        self.pulse = Some(Pulse {
            start: now,
            duration,
        });
        true
    }

    /// Returns `true` exactly once per pulse, on the first tick at or past
    /// its deadline.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.pulse {
            Some(p) if now.saturating_duration_since(p.start) >= p.duration => {
                self.pulse = None;
                true
            }
            _ => false,
        }
    }

    /// Drop the pulse without waiting. Returns whether one was running.
    pub fn clear(&mut self) -> bool {
        self.pulse.take().is_some()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
