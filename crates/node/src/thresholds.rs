//! Per-metric alert limits and the threshold-config update format.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{info, warn};

use crate::error::CommandError;
use crate::sensor::Metric;

// ---------------------------------------------------------------------------
// Threshold set
// ---------------------------------------------------------------------------

/// Current alert limits. Only metrics present at startup have a slot; an
/// update can change a slot's value but never add or remove one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdSet {
    limits: BTreeMap<Metric, f64>,
}

impl ThresholdSet {
    pub fn new(limits: impl IntoIterator<Item = (Metric, f64)>) -> Self {
        Self {
            limits: limits.into_iter().collect(),
        }
    }

    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.limits.get(&metric).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
        self.limits.iter().map(|(m, v)| (*m, *v))
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }

    /// Replace each tracked field present in `update`, one field at a time.
    /// Returns the fields that were written.
    pub(crate) fn apply(&mut self, update: &ThresholdUpdate) -> Vec<(Metric, f64)> {
        let mut applied = Vec::new();
        for &(metric, value) in &update.fields {
            match self.limits.get_mut(&metric) {
                Some(slot) => {
                    *slot = value;
                    info!(metric = %metric, limit = value, "threshold updated");
                    applied.push((metric, value));
                }
                None => {
                    warn!(metric = %metric, "threshold update for untracked metric ignored");
                }
            }
        }
        applied
    }
}

// ---------------------------------------------------------------------------
// Updates
// ---------------------------------------------------------------------------

/// A field that was present in a threshold payload but not usable.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedField {
    pub key: String,
    pub reason: &'static str,
}

/// A parsed threshold-config payload: the usable fields plus a record of
/// the ones that were skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdUpdate {
    pub fields: Vec<(Metric, f64)>,
    pub rejected: Vec<RejectedField>,
}

impl ThresholdUpdate {
    /// Parse a flat JSON object such as `{"temp": 28.5, "hum": 60}`.
    ///
    /// A payload that is not a JSON object fails as a whole. Inside an
    /// object each field stands alone: non-numeric values and unknown keys
    /// are recorded in `rejected` and do not affect the other fields.
    pub fn parse(payload: &str) -> Result<Self, CommandError> {
        let value: Value =
            serde_json::from_str(payload).map_err(CommandError::MalformedThresholds)?;
        let Value::Object(obj) = value else {
            return Err(CommandError::ThresholdsNotObject);
        };

        let mut update = Self::default();
        for (key, v) in obj {
            let Some(metric) = Metric::from_key(&key) else {
                update.rejected.push(RejectedField {
                    key,
                    reason: "unknown field",
                });
                continue;
            };
            match v.as_f64() {
                Some(limit) if limit.is_finite() => update.fields.push((metric, limit)),
                _ => update.rejected.push(RejectedField {
                    key,
                    reason: "not a number",
                }),
            }
        }
        Ok(update)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
