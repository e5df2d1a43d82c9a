//! In-memory [`BenchmarkService`] with scripted behavior.
//!
//! Submissions stay `Running` until the owner completes or fails them, so
//! tests decide exactly when each remote step finishes. Every call is
//! recorded for later assertions.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use pagebench_core::metrics::{Metric, Metrics};

use crate::error::RemoteServiceError;
use crate::messages::{SubmissionStatus, TestResult};
use crate::service::{ArtifactKind, BenchmarkService, ResultOptions, SubmitRequest};

struct FakeSubmission {
    id: String,
    request: SubmitRequest,
    status: SubmissionStatus,
    status_calls: u32,
}

#[derive(Default)]
struct FakeState {
    submissions: Vec<FakeSubmission>,
    /// `(label fragment, metrics)`; `None` metrics produce an empty result.
    results: Vec<(String, Option<Metrics>)>,
    request_hosts: Vec<String>,
    failing_submits: u32,
    failing_statuses: u32,
    failing_results: u32,
}

impl FakeState {
    fn find_mut(&mut self, id: &str) -> Option<&mut FakeSubmission> {
        self.submissions.iter_mut().find(|s| s.id == id)
    }
}

/// Scripted stand-in for the remote benchmark service.
pub struct ScriptedBenchmarkService {
    default_metrics: Metrics,
    state: Mutex<FakeState>,
}

impl Default for ScriptedBenchmarkService {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBenchmarkService {
    /// A service whose completed submissions report a plausible page load.
    pub fn new() -> Self {
        Self::with_default_metrics(
            Metrics::new()
                .with(Metric::LoadTime, 1500.0)
                .with(Metric::Ttfb, 200.0)
                .with(Metric::StartRender, 700.0)
                .with(Metric::SpeedIndex, 1100.0)
                .with(Metric::FullyLoaded, 2400.0)
                .with(Metric::BytesIn, 750_000.0)
                .with(Metric::Requests, 60.0),
        )
    }

    pub fn with_default_metrics(metrics: Metrics) -> Self {
        Self {
            default_metrics: metrics,
            state: Mutex::new(FakeState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- scripting ----

    /// Results for submissions whose label contains `label_fragment`.
    /// `None` yields a completed result without usable data.
    pub fn set_result(&self, label_fragment: impl Into<String>, metrics: Option<Metrics>) {
        self.lock().results.push((label_fragment.into(), metrics));
    }

    /// Request hosts reported in every completed result.
    pub fn set_request_hosts<I: IntoIterator<Item = S>, S: Into<String>>(&self, hosts: I) {
        self.lock().request_hosts = hosts.into_iter().map(Into::into).collect();
    }

    /// Make the next `n` submits fail with a service error.
    pub fn fail_next_submits(&self, n: u32) {
        self.lock().failing_submits = n;
    }

    /// Make the next `n` status checks fail with a transport-level error.
    pub fn fail_next_statuses(&self, n: u32) {
        self.lock().failing_statuses = n;
    }

    /// Make the next `n` result fetches fail with a transport-level error.
    pub fn fail_next_results(&self, n: u32) {
        self.lock().failing_results = n;
    }

    pub fn set_status(&self, submission_id: &str, status: SubmissionStatus) -> bool {
        match self.lock().find_mut(submission_id) {
            Some(submission) => {
                submission.status = status;
                true
            }
            None => false,
        }
    }

    pub fn complete(&self, submission_id: &str) -> bool {
        self.set_status(submission_id, SubmissionStatus::Complete)
    }

    pub fn fail(&self, submission_id: &str, code: u16, text: &str) -> bool {
        self.set_status(
            submission_id,
            SubmissionStatus::Error {
                code,
                text: text.to_string(),
            },
        )
    }

    /// Complete every non-terminal submission and return their ids.
    pub fn complete_outstanding(&self) -> Vec<String> {
        let mut state = self.lock();
        state
            .submissions
            .iter_mut()
            .filter(|s| !s.status.is_terminal())
            .map(|s| {
                s.status = SubmissionStatus::Complete;
                s.id.clone()
            })
            .collect()
    }

    // ---- inspection ----

    pub fn submission_count(&self) -> usize {
        self.lock().submissions.len()
    }

    /// All submissions in order, as `(id, request)`.
    pub fn submissions(&self) -> Vec<(String, SubmitRequest)> {
        self.lock()
            .submissions
            .iter()
            .map(|s| (s.id.clone(), s.request.clone()))
            .collect()
    }

    /// Ids of submissions whose label contains `label_fragment`.
    pub fn submissions_labelled(&self, label_fragment: &str) -> Vec<String> {
        self.lock()
            .submissions
            .iter()
            .filter(|s| s.request.label.contains(label_fragment))
            .map(|s| s.id.clone())
            .collect()
    }

    pub fn status_calls(&self, submission_id: &str) -> u32 {
        self.lock()
            .submissions
            .iter()
            .find(|s| s.id == submission_id)
            .map_or(0, |s| s.status_calls)
    }
}

#[async_trait]
impl BenchmarkService for ScriptedBenchmarkService {
    async fn submit(&self, request: &SubmitRequest) -> Result<String, RemoteServiceError> {
        let mut state = self.lock();
        if state.failing_submits > 0 {
            state.failing_submits -= 1;
            return Err(RemoteServiceError::Service {
                code: 400,
                text: "Scripted submit failure".to_string(),
            });
        }
        let id = format!("sub-{:04}", state.submissions.len() + 1);
        state.submissions.push(FakeSubmission {
            id: id.clone(),
            request: request.clone(),
            status: SubmissionStatus::Running,
            status_calls: 0,
        });
        Ok(id)
    }

    async fn status(&self, submission_id: &str) -> Result<SubmissionStatus, RemoteServiceError> {
        let mut state = self.lock();
        if state.failing_statuses > 0 {
            state.failing_statuses -= 1;
            return Err(RemoteServiceError::Http {
                status: 503,
                body: "Scripted status failure".to_string(),
            });
        }
        let submission = state.find_mut(submission_id).ok_or_else(|| {
            RemoteServiceError::Service {
                code: 404,
                text: format!("Unknown test {submission_id}"),
            }
        })?;
        submission.status_calls += 1;
        Ok(submission.status.clone())
    }

    async fn fetch_result(
        &self,
        submission_id: &str,
        _options: ResultOptions,
    ) -> Result<TestResult, RemoteServiceError> {
        let mut state = self.lock();
        if state.failing_results > 0 {
            state.failing_results -= 1;
            return Err(RemoteServiceError::Http {
                status: 502,
                body: "Scripted result failure".to_string(),
            });
        }
        let submission = state
            .submissions
            .iter()
            .find(|s| s.id == submission_id)
            .ok_or_else(|| RemoteServiceError::Service {
                code: 404,
                text: format!("Unknown test {submission_id}"),
            })?;

        match &submission.status {
            SubmissionStatus::Complete => {}
            SubmissionStatus::Error { code, text } => {
                return Err(RemoteServiceError::Service {
                    code: *code,
                    text: text.clone(),
                })
            }
            _ => {
                return Err(RemoteServiceError::Malformed(
                    "jsonResult: missing data".to_string(),
                ))
            }
        }

        let scripted = state
            .results
            .iter()
            .rev()
            .find(|(fragment, _)| submission.request.label.contains(fragment.as_str()))
            .map(|(_, metrics)| metrics.clone());

        let result = match scripted {
            Some(Some(metrics)) => TestResult::from_metrics(&metrics),
            Some(None) => TestResult::default(),
            None => TestResult::from_metrics(&self.default_metrics),
        };
        Ok(result.with_request_hosts(state.request_hosts.iter().cloned()))
    }

    async fn fetch_artifact(
        &self,
        submission_id: &str,
        kind: ArtifactKind,
    ) -> Result<Option<String>, RemoteServiceError> {
        match kind {
            ArtifactKind::Video => Ok(Some(format!("video-{submission_id}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pagebench_core::options::TestOptions;

    use super::*;

    fn request(label: &str) -> SubmitRequest {
        SubmitRequest {
            url: "https://example.com".into(),
            script: String::new(),
            options: TestOptions::default(),
            label: label.into(),
        }
    }

    #[tokio::test]
    async fn submissions_run_until_completed() {
        let service = ScriptedBenchmarkService::new();
        let id = service.submit(&request("a")).await.unwrap();

        assert_eq!(service.status(&id).await.unwrap(), SubmissionStatus::Running);
        assert!(service.fetch_result(&id, ResultOptions::default()).await.is_err());

        service.complete(&id);
        let result = service.fetch_result(&id, ResultOptions::default()).await.unwrap();
        assert_eq!(result.metrics(&id).unwrap().get(Metric::LoadTime), Some(1500.0));
        assert_eq!(service.status_calls(&id), 1);
    }

    #[tokio::test]
    async fn scripted_results_match_by_label() {
        let service = ScriptedBenchmarkService::new();
        service.set_result("-accel:", None);
        let base = service.submit(&request("c-base:performance")).await.unwrap();
        let accel = service.submit(&request("c-accel:performance")).await.unwrap();
        service.complete_outstanding();

        let base_result = service.fetch_result(&base, ResultOptions::default()).await.unwrap();
        let accel_result = service.fetch_result(&accel, ResultOptions::default()).await.unwrap();
        assert!(base_result.metrics(&base).is_ok());
        assert!(accel_result.metrics(&accel).is_err());
    }

    #[tokio::test]
    async fn scripted_submit_failures_are_consumed() {
        let service = ScriptedBenchmarkService::new();
        service.fail_next_submits(1);

        assert_matches!(
            service.submit(&request("a")).await,
            Err(RemoteServiceError::Service { code: 400, .. })
        );
        assert!(service.submit(&request("a")).await.is_ok());
        assert_eq!(service.submission_count(), 1);
    }

    #[tokio::test]
    async fn scripted_status_failures_are_consumed() {
        let service = ScriptedBenchmarkService::new();
        let id = service.submit(&request("a")).await.unwrap();
        service.fail_next_statuses(1);

        assert_matches!(
            service.status(&id).await,
            Err(RemoteServiceError::Http { status: 503, .. })
        );
        assert_eq!(service.status(&id).await.unwrap(), SubmissionStatus::Running);
    }
}
