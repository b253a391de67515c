//! Threshold comparison and alert payloads.
//!
//! No hysteresis and no suppression window: every sample over a limit
//! produces a report, so a sustained condition alerts once per sampling
//! cycle. All metrics over their limit in one cycle share one message.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::warn;

use crate::sensor::{Metric, Sample};
use crate::thresholds::ThresholdSet;

/// One metric over its limit. Built, published and discarded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertEvent {
    pub metric: Metric,
    pub observed: f64,
    pub limit: f64,
    pub at: Instant,
}

/// Wire shape of the alert message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertFormat {
    /// `HighTemp:31.2 °C > 30.0 °C HighHum:75.0 % > 70.0 %`
    Text,
    /// `{"ts":1700000000,"alerts":[{"metric":"gas_ppm","observed":950.0,"limit":900.0}]}`
    #[default]
    Json,
}

#[derive(Serialize)]
struct JsonAlert {
    metric: &'static str,
    observed: f64,
    limit: f64,
}

#[derive(Serialize)]
struct JsonReport {
    ts: i64,
    alerts: Vec<JsonAlert>,
}

fn text_label(metric: Metric) -> &'static str {
    match metric {
        Metric::Temperature => "HighTemp",
        Metric::Humidity => "HighHum",
        Metric::WaterLevel => "HighLevel",
        Metric::Load => "HighLoad",
        Metric::GasPpm => "HighGas",
        Metric::Voltage => "HighVoltage",
        Metric::AccelX | Metric::AccelY | Metric::AccelZ => "HighAccel",
        Metric::GyroX | Metric::GyroY | Metric::GyroZ => "HighGyro",
    }
}

impl AlertFormat {
    /// `unix_ts` is only used by the JSON form.
    pub fn render(self, events: &[AlertEvent], unix_ts: i64) -> Result<String, serde_json::Error> {
        match self {
            Self::Text => Ok(events
                .iter()
                .map(|e| {
                    let unit = e.metric.unit();
                    format!(
                        "{}:{:.1} {unit} > {:.1} {unit}",
                        text_label(e.metric),
                        e.observed,
                        e.limit
                    )
                })
                .collect::<Vec<_>>()
                .join(" ")),
            Self::Json => {
                let report = JsonReport {
                    ts: unix_ts,
                    alerts: events
                        .iter()
                        .map(|e| JsonAlert {
                            metric: e.metric.name(),
                            observed: e.observed,
                            limit: e.limit,
                        })
                        .collect(),
                };
                serde_json::to_string(&report)
            }
        }
    }
}

/// Alerts raised by one sampling cycle, ready to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertReport {
    pub events: Vec<AlertEvent>,
    /// `None` when the payload could not be rendered; the events still
    /// stand and the caller skips the publish.
    pub payload: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AlertingEngine {
    format: AlertFormat,
}

impl AlertingEngine {
    pub fn new(format: AlertFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> AlertFormat {
        self.format
    }

    /// Compare one reading against its limit. Strictly greater than; a
    /// metric with no configured limit never alerts.
    pub fn check(
        &self,
        now: Instant,
        metric: Metric,
        value: f64,
        thresholds: &ThresholdSet,
    ) -> Option<AlertEvent> {
        let limit = thresholds.get(metric)?;
        (value > limit).then_some(AlertEvent {
            metric,
            observed: value,
            limit,
            at: now,
        })
    }

    /// Check every reading of `sample`. `None` when nothing is over.
    pub fn evaluate(
        &self,
        now: Instant,
        sample: &Sample,
        thresholds: &ThresholdSet,
    ) -> Option<AlertReport> {
        let events: Vec<AlertEvent> = sample
            .iter()
            .filter_map(|(metric, value)| self.check(now, metric, value, thresholds))
            .collect();
        if events.is_empty() {
            return None;
        }
        let payload = match self
            .format
            .render(&events, OffsetDateTime::now_utc().unix_timestamp())
        {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("alert payload not rendered: {e}");
                None
            }
        };
        Some(AlertReport { events, payload })
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn climate_limits() -> ThresholdSet {
        ThresholdSet::new([(Metric::Temperature, 30.0), (Metric::Humidity, 70.0)])
    }

    // -- check ----------------------------------------------------------------

    #[test]
    fn over_limit_raises_event() {
        let now = Instant::now();
        let engine = AlertingEngine::new(AlertFormat::Text);
        let e = engine
            .check(now, Metric::Temperature, 31.2, &climate_limits())
            .unwrap();
        assert_eq!(e.metric, Metric::Temperature);
        assert_eq!(e.observed, 31.2);
        assert_eq!(e.limit, 30.0);
        assert_eq!(e.at, now);
    }

    #[test]
    fn equal_to_limit_does_not_alert() {
        let engine = AlertingEngine::default();
        assert!(engine
            .check(Instant::now(), Metric::Temperature, 30.0, &climate_limits())
            .is_none());
    }

    #[test]
    fn metric_without_limit_never_alerts() {
        let engine = AlertingEngine::default();
        assert!(engine
            .check(Instant::now(), Metric::GasPpm, 10_000.0, &climate_limits())
            .is_none());
    }

    // -- evaluate -------------------------------------------------------------

    #[test]
    fn quiet_sample_yields_nothing() {
        let engine = AlertingEngine::new(AlertFormat::Text);
        let s = Sample::new()
            .with(Metric::Temperature, 24.0)
            .with(Metric::Humidity, 40.0);
        assert!(engine.evaluate(Instant::now(), &s, &climate_limits()).is_none());
    }

    #[test]
    fn text_report_single_metric() {
        let engine = AlertingEngine::new(AlertFormat::Text);
        let s = Sample::new()
            .with(Metric::Temperature, 31.2)
            .with(Metric::Humidity, 40.0);
        let r = engine.evaluate(Instant::now(), &s, &climate_limits()).unwrap();
        assert_eq!(r.events.len(), 1);
        assert_eq!(r.payload.as_deref(), Some("HighTemp:31.2 °C > 30.0 °C"));
    }

    #[test]
    fn text_report_combines_metrics() {
        let engine = AlertingEngine::new(AlertFormat::Text);
        let s = Sample::new()
            .with(Metric::Temperature, 31.2)
            .with(Metric::Humidity, 75.0);
        let r = engine.evaluate(Instant::now(), &s, &climate_limits()).unwrap();
        assert_eq!(r.events.len(), 2);
        assert_eq!(
            r.payload.as_deref(),
            Some("HighTemp:31.2 °C > 30.0 °C HighHum:75.0 % > 70.0 %")
        );
    }

    #[test]
    fn json_report_shape() {
        let events = [AlertEvent {
            metric: Metric::GasPpm,
            observed: 950.0,
            limit: 900.0,
            at: Instant::now(),
        }];
        let payload = AlertFormat::Json.render(&events, 1_700_000_000).unwrap();
        let v: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(v["ts"], 1_700_000_000);
        assert_eq!(v["alerts"][0]["metric"], "gas_ppm");
        assert_eq!(v["alerts"][0]["observed"], 950.0);
        assert_eq!(v["alerts"][0]["limit"], 900.0);
    }

    #[test]
    fn sustained_condition_alerts_every_cycle() {
        let t0 = Instant::now();
        let engine = AlertingEngine::default();
        let limits = ThresholdSet::new([(Metric::GasPpm, 900.0)]);
        let s = Sample::new().with(Metric::GasPpm, 1200.0);
        let reports: Vec<_> = (0..5u64)
            .filter_map(|i| {
                engine.evaluate(t0 + std::time::Duration::from_secs(i), &s, &limits)
            })
            .collect();
        assert_eq!(reports.len(), 5);
    }
}
