//! Remote activation gate and the shared node context.
//!
//! The context is the only home of process-wide state. Its mutators are
//! crate-private and called from the command dispatcher alone; every other
//! component receives `&NodeContext`.

use tracing::info;

use crate::thresholds::ThresholdSet;

/// Outcome of writing the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateTransition {
    Activated,
    Deactivated,
    Unchanged,
}

/// "System active" flag. Starts inactive.
#[derive(Debug, Default)]
pub struct ActivationGate {
    active: bool,
}

impl ActivationGate {
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn set_active(&mut self, active: bool) -> GateTransition {
        if self.active == active {
            return GateTransition::Unchanged;
        }
        self.active = active;
        if active {
            info!("system activated");
            GateTransition::Activated
        } else {
            info!("system deactivated");
            GateTransition::Deactivated
        }
    }
}

/// State shared by every component of one node.
#[derive(Debug, Default)]
pub struct NodeContext {
    gate: ActivationGate,
    thresholds: ThresholdSet,
}

impl NodeContext {
    pub fn new(thresholds: ThresholdSet) -> Self {
        Self {
            gate: ActivationGate::default(),
            thresholds,
        }
    }

    pub fn is_active(&self) -> bool {
        self.gate.is_active()
    }

    pub fn thresholds(&self) -> &ThresholdSet {
        &self.thresholds
    }

    pub(crate) fn gate_mut(&mut self) -> &mut ActivationGate {
        &mut self.gate
    }

    pub(crate) fn thresholds_mut(&mut self) -> &mut ThresholdSet {
        &mut self.thresholds
    }
}
