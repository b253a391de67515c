//! Discrete outputs (LEDs, relays, buzzer) via GPIO. The `gpio` feature
//! gates the real rppal driver; without it, a mock board keeps levels in
//! memory and logs changes.
//!
//! Outputs are addressed by [`OutputId`] (bank name + 1-based index). The
//! table is built once at startup and every output is driven off before the
//! board is handed out.

use std::collections::BTreeMap;
use std::fmt;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};
use tracing::{debug, warn};

use crate::error::NodeError;

// ---------------------------------------------------------------------------
// Addressing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId {
    pub bank: &'static str,
    pub index: u8,
}

impl OutputId {
    pub const fn new(bank: &'static str, index: u8) -> Self {
        Self { bank, index }
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.bank, self.index)
    }
}

/// A group of same-kind outputs, e.g. five red LEDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBank {
    pub name: &'static str,
    /// Pin for index 1, 2, ... in order.
    pub pins: Vec<u8>,
    /// Reachable with `<name><N>_ON` / `<name><N>_OFF` commands.
    pub addressable: bool,
    /// Commands for this bank are ignored while the node is inactive.
    pub requires_activation: bool,
    /// Driven through a relay board; follows the board's `active_low`
    /// polarity. LEDs and buzzers are always active-high.
    pub relay: bool,
}

impl OutputBank {
    pub fn ids(&self) -> impl Iterator<Item = OutputId> + '_ {
        (1..=self.pins.len() as u8).map(move |i| OutputId::new(self.name, i))
    }

    pub fn contains(&self, index: u8) -> bool {
        index >= 1 && usize::from(index) <= self.pins.len()
    }
}

/// Where one output is wired and whether its pin is driven low for "on".
#[derive(Debug, Clone, Copy)]
struct Wiring {
    pin: u8,
    inverted: bool,
}

impl Wiring {
    /// Electrical level for a logical state.
    fn level(self, on: bool) -> bool {
        on != self.inverted
    }
}

fn pin_table(banks: &[OutputBank], active_low: bool) -> BTreeMap<OutputId, Wiring> {
    banks
        .iter()
        .flat_map(|b| {
            let inverted = active_low && b.relay;
            b.ids()
                .zip(b.pins.iter().map(move |&pin| Wiring { pin, inverted }))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Real GPIO output board (requires rppal + hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub struct OutputBoard {
    pins: BTreeMap<OutputId, (OutputPin, Wiring)>,
    levels: BTreeMap<OutputId, bool>,
}

#[cfg(feature = "gpio")]
impl OutputBoard {
    pub fn new(banks: &[OutputBank], active_low: bool) -> Result<Self, NodeError> {
        let gpio = Gpio::new().map_err(|e| NodeError::Board(e.to_string()))?;
        let mut pins = BTreeMap::new();
        let mut levels = BTreeMap::new();

        for (id, wiring) in pin_table(banks, active_low) {
            let pin = gpio
                .get(wiring.pin)
                .map_err(|e| NodeError::Board(format!("{id} (gpio {}): {e}", wiring.pin)))?
                .into_output();
            pins.insert(id, (pin, wiring));
            levels.insert(id, true);
        }

        let mut board = Self { pins, levels };
        // Fail-safe: everything off before the first command.
        board.all_off();
        Ok(board)
    }

    pub fn set(&mut self, id: OutputId, on: bool) -> bool {
        let Some((pin, wiring)) = self.pins.get_mut(&id) else {
            warn!(output = %id, "unknown output");
            return false;
        };
        if wiring.level(on) {
            pin.set_high();
        } else {
            pin.set_low();
        }
        if self.levels.insert(id, on) != Some(on) {
            debug!(output = %id, on, "output set");
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Mock output board (development / tests)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub struct OutputBoard {
    levels: BTreeMap<OutputId, bool>,
    wiring: BTreeMap<OutputId, Wiring>,
}

#[cfg(not(feature = "gpio"))]
impl OutputBoard {
    pub fn new(banks: &[OutputBank], active_low: bool) -> Result<Self, NodeError> {
        let wiring = pin_table(banks, active_low);
        for (id, w) in &wiring {
            debug!(
                output = %id,
                gpio = w.pin,
                inverted = w.inverted,
                "[mock-gpio] registered output (not wired)"
            );
        }
        let mut board = Self {
            levels: wiring.keys().map(|id| (*id, true)).collect(),
            wiring,
        };
        board.all_off();
        Ok(board)
    }

    pub fn set(&mut self, id: OutputId, on: bool) -> bool {
        let Some(level) = self.levels.get_mut(&id) else {
            warn!(output = %id, "[mock-gpio] unknown output");
            return false;
        };
        if *level != on {
            debug!(output = %id, on, "[mock-gpio] output set");
        }
        *level = on;
        true
    }

    /// The electrical level the pin would be driven to.
    pub fn pin_high(&self, id: OutputId) -> Option<bool> {
        let on = *self.levels.get(&id)?;
        self.wiring.get(&id).map(|w| w.level(on))
    }
}

// ---------------------------------------------------------------------------
// Shared by both boards
// ---------------------------------------------------------------------------

impl OutputBoard {
    pub fn is_on(&self, id: OutputId) -> bool {
        self.levels.get(&id).copied().unwrap_or(false)
    }

    pub fn ids(&self) -> Vec<OutputId> {
        self.levels.keys().copied().collect()
    }

    pub fn all_off(&mut self) {
        self.all_off_except(None);
    }

    /// Drive every output off, optionally sparing one (an in-flight timed
    /// pulse that must run to completion).
    pub fn all_off_except(&mut self, spared: Option<OutputId>) {
        for id in self.ids() {
            if Some(id) != spared {
                self.set(id, false);
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
