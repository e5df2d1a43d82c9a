//! The benchmark service contract.

use async_trait::async_trait;
use pagebench_core::options::TestOptions;
use serde::{Deserialize, Serialize};

use crate::error::RemoteServiceError;
use crate::messages::{SubmissionStatus, TestResult};

/// One scripted page load to run remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub url: String,
    /// Benchmark script driving the browser.
    pub script: String,
    pub options: TestOptions,
    /// Free-form label shown by the service, e.g. `"<run id>:warmup"`.
    pub label: String,
}

/// Detail level of a fetched result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultOptions {
    /// Include per-request data.
    pub requests: bool,
    /// Include the per-content-type breakdown.
    pub breakdown: bool,
}

/// Auxiliary artifacts derived from a finished submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Rendered load video.
    Video,
}

/// Operations on the remote benchmark service.
///
/// Implementations own no job state and never retry.
#[async_trait]
pub trait BenchmarkService: Send + Sync {
    /// Queue a submission and return its id.
    async fn submit(&self, request: &SubmitRequest) -> Result<String, RemoteServiceError>;

    async fn status(&self, submission_id: &str) -> Result<SubmissionStatus, RemoteServiceError>;

    async fn fetch_result(
        &self,
        submission_id: &str,
        options: ResultOptions,
    ) -> Result<TestResult, RemoteServiceError>;

    /// Request an artifact. `Ok(None)` when the service produced none.
    async fn fetch_artifact(
        &self,
        submission_id: &str,
        kind: ArtifactKind,
    ) -> Result<Option<String>, RemoteServiceError>;
}
