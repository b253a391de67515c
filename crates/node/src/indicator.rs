//! Three-lamp status indicator (green / yellow / red) driven by one metric.

use crate::outputs::OutputId;
use crate::sensor::Metric;

/// Output bank holding the lamps, index 1 = safe, 2 = warning, 3 = danger.
pub const INDICATOR_BANK: &str = "indicator";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Band {
    Safe,
    Warning,
    Danger,
}

impl Band {
    pub const ALL: [Band; 3] = [Self::Safe, Self::Warning, Self::Danger];

    pub fn output(self) -> OutputId {
        let index = match self {
            Self::Safe => 1,
            Self::Warning => 2,
            Self::Danger => 3,
        };
        OutputId::new(INDICATOR_BANK, index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorBands {
    pub metric: Metric,
    pub warning_above: f64,
    pub danger_above: f64,
}

impl IndicatorBands {
    pub fn classify(&self, value: f64) -> Band {
        if value > self.danger_above {
            Band::Danger
        } else if value > self.warning_above {
            Band::Warning
        } else {
            Band::Safe
        }
    }
}

/// Tracks which lamp is lit so outputs are only rewritten on a band change.
#[derive(Debug, Clone)]
pub struct Indicator {
    bands: IndicatorBands,
    lit: Option<Band>,
}

impl Indicator {
    pub fn new(bands: IndicatorBands) -> Self {
        Self { bands, lit: None }
    }

    pub fn metric(&self) -> Metric {
        self.bands.metric
    }

    pub fn lit(&self) -> Option<Band> {
        self.lit
    }

    /// Returns the new band when it differs from the lit one.
    pub fn update(&mut self, value: f64) -> Option<Band> {
        let band = self.bands.classify(value);
        if self.lit == Some(band) {
            return None;
        }
        self.lit = Some(band);
        Some(band)
    }

    /// Forget the lit lamp (the caller has driven every output off).
    pub fn reset(&mut self) {
        self.lit = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gas() -> IndicatorBands {
        IndicatorBands {
            metric: Metric::GasPpm,
            warning_above: 600.0,
            danger_above: 900.0,
        }
    }

    #[test]
    fn classify_band_edges() {
        let b = gas();
        assert_eq!(b.classify(100.0), Band::Safe);
        assert_eq!(b.classify(600.0), Band::Safe);
        assert_eq!(b.classify(601.0), Band::Warning);
        assert_eq!(b.classify(900.0), Band::Warning);
        assert_eq!(b.classify(901.0), Band::Danger);
    }

    #[test]
    fn update_reports_changes_only() {
        let mut ind = Indicator::new(gas());
        assert_eq!(ind.update(100.0), Some(Band::Safe));
        assert_eq!(ind.update(200.0), None);
        assert_eq!(ind.update(700.0), Some(Band::Warning));
        assert_eq!(ind.update(950.0), Some(Band::Danger));
        assert_eq!(ind.lit(), Some(Band::Danger));
    }

    #[test]
    fn reset_forces_next_update() {
        let mut ind = Indicator::new(gas());
        ind.update(100.0);
        ind.reset();
        assert_eq!(ind.lit(), None);
        assert_eq!(ind.update(100.0), Some(Band::Safe));
    }

    #[test]
    fn band_outputs() {
        assert_eq!(Band::Safe.output().to_string(), "indicator1");
        assert_eq!(Band::Danger.output().to_string(), "indicator3");
    }
}
