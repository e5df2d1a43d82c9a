//! HTTP implementation of [`BenchmarkService`].
//!
//! Speaks the WebPageTest-style JSON API (`runtest.php`,
//! `testStatus.php`, `jsonResult.php`, `video/create.php`) using
//! [`reqwest`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::RemoteServiceError;
use crate::messages::{Envelope, SubmissionStatus, SubmitData, TestResult, VideoData};
use crate::service::{ArtifactKind, BenchmarkService, ResultOptions, SubmitRequest};

/// HTTP client for one benchmark service deployment.
pub struct BenchmarkApi {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    /// Webhook target passed with every submission.
    pingback_url: Option<String>,
}

impl BenchmarkApi {
    /// * `base_url` - e.g. `https://www.webpagetest.org`.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, api_key)
    }

    /// Reuse an existing [`reqwest::Client`] (shares its connection pool).
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            pingback_url: None,
        }
    }

    pub fn with_pingback(mut self, pingback_url: impl Into<String>) -> Self {
        self.pingback_url = Some(pingback_url.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    // ---- private helpers ----

    /// Return the response unchanged on a 2xx status, otherwise an
    /// [`RemoteServiceError::Http`] with the body text.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, RemoteServiceError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(RemoteServiceError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<Envelope<T>, RemoteServiceError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<Envelope<T>>().await?)
    }
}

#[async_trait]
impl BenchmarkService for BenchmarkApi {
    async fn submit(&self, request: &SubmitRequest) -> Result<String, RemoteServiceError> {
        let location = format!(
            "{}.{}",
            request.options.location, request.options.connectivity
        );
        let mobile = if request.options.mobile { "1" } else { "0" };

        let mut form: Vec<(&str, &str)> = vec![
            ("f", "json"),
            ("url", request.url.as_str()),
            ("script", request.script.as_str()),
            ("label", request.label.as_str()),
            ("location", location.as_str()),
            ("mobile", mobile),
            ("runs", "1"),
            ("fvonly", "1"),
        ];
        if let Some(key) = &self.api_key {
            form.push(("k", key.as_str()));
        }
        if let Some(pingback) = &self.pingback_url {
            form.push(("pingback", pingback.as_str()));
        }

        let response = self
            .client
            .post(self.url("runtest.php"))
            .form(&form)
            .send()
            .await?;

        let data: SubmitData = Self::parse_envelope(response).await?.into_data("runtest")?;

        tracing::debug!(
            submission_id = %data.test_id,
            label = %request.label,
            "Benchmark submitted",
        );
        Ok(data.test_id)
    }

    async fn status(&self, submission_id: &str) -> Result<SubmissionStatus, RemoteServiceError> {
        let response = self
            .client
            .get(self.url("testStatus.php"))
            .query(&[("f", "json"), ("test", submission_id)])
            .send()
            .await?;

        // Error codes here describe the submission, not the request.
        let envelope: Envelope<serde_json::Value> = Self::parse_envelope(response).await?;
        Ok(SubmissionStatus::from_code(
            envelope.status_code,
            envelope.status_text,
        ))
    }

    async fn fetch_result(
        &self,
        submission_id: &str,
        options: ResultOptions,
    ) -> Result<TestResult, RemoteServiceError> {
        let flag = |on: bool| if on { "1" } else { "0" };
        let response = self
            .client
            .get(self.url("jsonResult.php"))
            .query(&[
                ("test", submission_id),
                ("requests", flag(options.requests)),
                ("breakdown", flag(options.breakdown)),
            ])
            .send()
            .await?;

        Self::parse_envelope(response).await?.into_data("jsonResult")
    }

    async fn fetch_artifact(
        &self,
        submission_id: &str,
        kind: ArtifactKind,
    ) -> Result<Option<String>, RemoteServiceError> {
        match kind {
            ArtifactKind::Video => {
                let response = self
                    .client
                    .get(self.url("video/create.php"))
                    .query(&[("tests", submission_id), ("f", "json")])
                    .send()
                    .await?;
                let envelope: Envelope<VideoData> = Self::parse_envelope(response).await?;
                Ok(envelope.into_result()?.data.and_then(|d| d.video_id))
            }
        }
    }
}
