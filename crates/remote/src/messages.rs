//! Response types of the benchmark service's JSON API.
//!
//! Every endpoint answers with the envelope
//! `{"statusCode": n, "statusText": "...", "data": {...}}`. The embedded
//! status code, not the HTTP status, carries the submission state:
//! 1xx pending, 200 complete, 400 and above failed.

use pagebench_core::metrics::{DataInconsistencyError, Metric, Metrics};
use serde::{Deserialize, Serialize};

use crate::error::RemoteServiceError;

/// Embedded status codes at or above this value are errors.
pub const ERROR_STATUS_THRESHOLD: u16 = 400;

/// Generic response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(rename = "statusText", default)]
    pub status_text: String,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    /// Reject envelopes whose embedded status reports a failure.
    pub fn into_result(self) -> Result<Self, RemoteServiceError> {
        if self.status_code >= ERROR_STATUS_THRESHOLD {
            return Err(RemoteServiceError::Service {
                code: self.status_code,
                text: self.status_text,
            });
        }
        Ok(self)
    }

    /// The `data` member, which must be present.
    pub fn into_data(self, endpoint: &str) -> Result<T, RemoteServiceError> {
        self.into_result()?
            .data
            .ok_or_else(|| RemoteServiceError::Malformed(format!("{endpoint}: missing data")))
    }
}

/// `data` of a `runtest.php` response.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitData {
    #[serde(rename = "testId")]
    pub test_id: String,
}

/// `data` of a `video/create.php` response.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoData {
    #[serde(rename = "videoId")]
    pub video_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// State of a remote submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum SubmissionStatus {
    Queued,
    Running,
    Complete,
    Error { code: u16, text: String },
}

impl SubmissionStatus {
    /// Map an embedded status code.
    pub fn from_code(code: u16, text: impl Into<String>) -> Self {
        match code {
            101 => Self::Queued,
            100..=199 => Self::Running,
            200..=299 => Self::Complete,
            _ => Self::Error {
                code,
                text: text.into(),
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error { .. })
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// `data` of a `jsonResult.php` response, reduced to the median first view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestResult {
    #[serde(default)]
    pub median: Option<MedianRun>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MedianRun {
    #[serde(rename = "firstView", default)]
    pub first_view: Option<ViewMetrics>,
}

/// Raw timing and size figures of one page view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViewMetrics {
    #[serde(rename = "loadTime")]
    pub load_time: Option<f64>,
    #[serde(rename = "TTFB")]
    pub ttfb: Option<f64>,
    #[serde(rename = "render")]
    pub start_render: Option<f64>,
    #[serde(rename = "SpeedIndex")]
    pub speed_index: Option<f64>,
    #[serde(rename = "fullyLoaded")]
    pub fully_loaded: Option<f64>,
    #[serde(rename = "bytesIn")]
    pub bytes_in: Option<f64>,
    #[serde(rename = "requestsFull")]
    pub requests: Option<f64>,
    /// Per-request entries; present only when requested, and not always
    /// an array, so it is kept untyped.
    #[serde(rename = "requests", default, skip_serializing_if = "Option::is_none")]
    pub request_list: Option<serde_json::Value>,
}

impl ViewMetrics {
    fn field(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::LoadTime => self.load_time,
            Metric::Ttfb => self.ttfb,
            Metric::StartRender => self.start_render,
            Metric::SpeedIndex => self.speed_index,
            Metric::FullyLoaded => self.fully_loaded,
            Metric::BytesIn => self.bytes_in,
            Metric::Requests => self.requests,
        }
    }

    fn field_mut(&mut self, metric: Metric) -> &mut Option<f64> {
        match metric {
            Metric::LoadTime => &mut self.load_time,
            Metric::Ttfb => &mut self.ttfb,
            Metric::StartRender => &mut self.start_render,
            Metric::SpeedIndex => &mut self.speed_index,
            Metric::FullyLoaded => &mut self.fully_loaded,
            Metric::BytesIn => &mut self.bytes_in,
            Metric::Requests => &mut self.requests,
        }
    }
}

impl TestResult {
    /// Build a result whose median first view carries `metrics`.
    pub fn from_metrics(metrics: &Metrics) -> Self {
        let mut view = ViewMetrics::default();
        for (metric, value) in metrics.iter() {
            *view.field_mut(metric) = Some(value);
        }
        Self {
            median: Some(MedianRun {
                first_view: Some(view),
            }),
        }
    }

    /// Attach per-request entries for the given hosts.
    pub fn with_request_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries: Vec<serde_json::Value> = hosts
            .into_iter()
            .map(|h| serde_json::json!({ "host": h.into() }))
            .collect();
        if let Some(view) = self.median.as_mut().and_then(|m| m.first_view.as_mut()) {
            view.request_list = Some(serde_json::Value::Array(entries));
        }
        self
    }

    /// Host of every request in the median first view, in load order.
    pub fn request_hosts(&self) -> Vec<String> {
        self.median
            .as_ref()
            .and_then(|m| m.first_view.as_ref())
            .and_then(|v| v.request_list.as_ref())
            .and_then(|list| list.as_array())
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| e.get("host").and_then(|h| h.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Extract the tracked metrics.
    ///
    /// A completed submission without a median first view, or with none of
    /// the tracked figures, is inconsistent.
    pub fn metrics(&self, submission_id: &str) -> Result<Metrics, DataInconsistencyError> {
        let view = self
            .median
            .as_ref()
            .and_then(|m| m.first_view.as_ref())
            .ok_or_else(|| DataInconsistencyError::new(submission_id, "no median first view"))?;

        let mut metrics = Metrics::new();
        for metric in Metric::ALL {
            if let Some(value) = view.field(metric) {
                metrics.insert(metric, value);
            }
        }
        if metrics.is_empty() {
            return Err(DataInconsistencyError::new(
                submission_id,
                "median first view has no usable metrics",
            ));
        }
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn status_codes_map_to_states() {
        assert_eq!(SubmissionStatus::from_code(101, ""), SubmissionStatus::Queued);
        assert_eq!(SubmissionStatus::from_code(100, ""), SubmissionStatus::Running);
        assert_eq!(SubmissionStatus::from_code(102, ""), SubmissionStatus::Running);
        assert_eq!(SubmissionStatus::from_code(200, ""), SubmissionStatus::Complete);
        assert_matches!(
            SubmissionStatus::from_code(404, "Test not found"),
            SubmissionStatus::Error { code: 404, .. }
        );
        assert!(!SubmissionStatus::Running.is_terminal());
        assert!(SubmissionStatus::Complete.is_terminal());
    }

    #[test]
    fn embedded_error_status_is_rejected() {
        let envelope: Envelope<SubmitData> =
            serde_json::from_str(r#"{"statusCode": 400, "statusText": "Invalid API key"}"#)
                .unwrap();
        assert_matches!(
            envelope.into_data("runtest"),
            Err(RemoteServiceError::Service { code: 400, .. })
        );
    }

    #[test]
    fn parses_median_first_view() {
        let body = r#"{
            "statusCode": 200,
            "statusText": "Test Complete",
            "data": {
                "median": {
                    "firstView": {
                        "loadTime": 1520,
                        "TTFB": 210,
                        "render": 800,
                        "SpeedIndex": 1100,
                        "fullyLoaded": 2300,
                        "bytesIn": 512000,
                        "requestsFull": 48,
                        "browser_name": "Chrome"
                    }
                }
            }
        }"#;
        let envelope: Envelope<TestResult> = serde_json::from_str(body).unwrap();
        let metrics = envelope.into_data("jsonResult").unwrap().metrics("t1").unwrap();

        assert_eq!(metrics.len(), Metric::ALL.len());
        assert_eq!(metrics.get(Metric::LoadTime), Some(1520.0));
        assert_eq!(metrics.get(Metric::Requests), Some(48.0));
    }

    #[test]
    fn request_hosts_tolerate_count_shape() {
        let counted: TestResult =
            serde_json::from_str(r#"{"median": {"firstView": {"loadTime": 1, "requests": 12}}}"#)
                .unwrap();
        assert!(counted.request_hosts().is_empty());

        let listed: TestResult = serde_json::from_str(
            r#"{"median": {"firstView": {"loadTime": 1, "requests": [
                {"host": "example.com"}, {"host": "ads.example.net"}
            ]}}}"#,
        )
        .unwrap();
        assert_eq!(listed.request_hosts(), vec!["example.com", "ads.example.net"]);
    }

    #[test]
    fn missing_first_view_is_inconsistent() {
        let result: TestResult = serde_json::from_str(r#"{"median": {}}"#).unwrap();
        let err = result.metrics("t1").unwrap_err();
        assert_eq!(err.submission_id, "t1");
    }

    #[test]
    fn empty_first_view_is_inconsistent() {
        let result: TestResult = serde_json::from_str(r#"{"median": {"firstView": {}}}"#).unwrap();
        assert!(result.metrics("t1").is_err());
    }
}
