//! Digital inputs (momentary buttons, active-low with pull-up). Raw levels
//! only; debouncing happens in [`crate::debounce`].

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, InputPin};
#[cfg(not(feature = "gpio"))]
use tracing::debug;

use crate::error::NodeError;

#[cfg(feature = "gpio")]
pub struct InputBoard {
    pins: Vec<InputPin>,
}

#[cfg(feature = "gpio")]
impl InputBoard {
    pub fn new(pins: &[u8]) -> Result<Self, NodeError> {
        let gpio = Gpio::new().map_err(|e| NodeError::Board(e.to_string()))?;
        let pins = pins
            .iter()
            .map(|&p| {
                gpio.get(p)
                    .map(|pin| pin.into_input_pullup())
                    .map_err(|e| NodeError::Board(format!("input gpio {p}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { pins })
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    /// `true` = high (released, for an active-low button).
    pub fn read(&self, index: usize) -> bool {
        self.pins.get(index).map_or(true, |p| p.is_high())
    }
}

/// In-memory inputs; tests and the simulator drive levels directly.
#[cfg(not(feature = "gpio"))]
pub struct InputBoard {
    levels: Vec<bool>,
}

#[cfg(not(feature = "gpio"))]
impl InputBoard {
    pub fn new(pins: &[u8]) -> Result<Self, NodeError> {
        for p in pins {
            debug!(gpio = p, "[mock-gpio] registered input (pulled high)");
        }
        Ok(Self {
            levels: vec![true; pins.len()],
        })
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn read(&self, index: usize) -> bool {
        self.levels.get(index).copied().unwrap_or(true)
    }

    pub fn set_level(&mut self, index: usize, high: bool) {
        if let Some(level) = self.levels.get_mut(index) {
            *level = high;
        }
    }
}

impl InputBoard {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
