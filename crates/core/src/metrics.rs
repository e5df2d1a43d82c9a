//! Tracked page-load metrics and the result-shape error.
//!
//! A [`Metrics`] value is the set of measurements collected from the
//! performance stage of one run. Any metric may be missing: the remote
//! service omits fields it could not measure.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A page-load measurement tracked for every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Time until the `onload` event fired (ms).
    LoadTime,
    /// Time to first byte (ms).
    Ttfb,
    /// Time until the first pixel was painted (ms).
    StartRender,
    /// Visual completeness index.
    SpeedIndex,
    /// Time until network activity stopped (ms).
    FullyLoaded,
    /// Bytes downloaded.
    BytesIn,
    /// Number of requests issued.
    Requests,
}

impl Metric {
    /// Every tracked metric, in display order.
    pub const ALL: [Metric; 7] = [
        Metric::LoadTime,
        Metric::Ttfb,
        Metric::StartRender,
        Metric::SpeedIndex,
        Metric::FullyLoaded,
        Metric::BytesIn,
        Metric::Requests,
    ];

    /// Stable snake_case name used in JSON and logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::LoadTime => "load_time",
            Self::Ttfb => "ttfb",
            Self::StartRender => "start_render",
            Self::SpeedIndex => "speed_index",
            Self::FullyLoaded => "fully_loaded",
            Self::BytesIn => "bytes_in",
            Self::Requests => "requests",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Collected measurements for one run, keyed by metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metrics(BTreeMap<Metric, f64>);

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a value. Non-finite values are dropped.
    pub fn insert(&mut self, metric: Metric, value: f64) {
        if value.is_finite() {
            self.0.insert(metric, value);
        }
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, metric: Metric, value: f64) -> Self {
        self.insert(metric, value);
        self
    }

    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.0.get(&metric).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
        self.0.iter().map(|(m, v)| (*m, *v))
    }
}

/// A completed remote result carried no usable measurements.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Result for submission {submission_id} has no usable data: {reason}")]
pub struct DataInconsistencyError {
    pub submission_id: String,
    pub reason: String,
}

impl DataInconsistencyError {
    pub fn new(submission_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            submission_id: submission_id.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_finite_values_are_dropped() {
        let metrics = Metrics::new()
            .with(Metric::LoadTime, f64::NAN)
            .with(Metric::Ttfb, f64::INFINITY)
            .with(Metric::BytesIn, 1024.0);

        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics.get(Metric::BytesIn), Some(1024.0));
        assert_eq!(metrics.get(Metric::LoadTime), None);
    }

    #[test]
    fn serializes_as_snake_case_map() {
        let metrics = Metrics::new().with(Metric::SpeedIndex, 1200.0);
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json, serde_json::json!({"speed_index": 1200.0}));

        let back: Metrics = serde_json::from_value(json).unwrap();
        assert_eq!(back, metrics);
    }

    #[test]
    fn metric_names_match_serde() {
        for metric in Metric::ALL {
            let json = serde_json::to_value(metric).unwrap();
            assert_eq!(json, metric.name());
        }
    }

    #[test]
    fn data_inconsistency_display() {
        let err = DataInconsistencyError::new("abc", "missing median");
        assert_eq!(
            err.to_string(),
            "Result for submission abc has no usable data: missing median"
        );
    }
}
