//! Advancing one benchmark run through its stages.
//!
//! A run moves `New -> Staging -> PerformancePending -> Finished`
//! (baseline runs skip staging). Each call to [`RunAdvancer::next`] looks
//! at the persisted stages and takes at most one step forward:
//!
//! 1. finished: re-notify the owning comparison if it is still waiting;
//! 2. stages outstanding: poll them, completing terminal ones in place;
//! 3. otherwise: claim and submit the next planned stage.
//!
//! Stages are claimed by a compare-and-swap write before submission, so
//! concurrent calls never submit the same stage twice. Remote failures
//! finish the run without data instead of leaving it pending.

use std::sync::Arc;

use chrono::Utc;
use pagebench_core::metrics::Metrics;
use pagebench_core::options::StageKind;
use pagebench_db::models::comparison::RUNS_FIELD;
use pagebench_db::models::run::STAGES_FIELD;
use pagebench_db::models::{Comparison, Run, Stage};
use pagebench_db::{DocumentStore, Repo};
use pagebench_remote::{
    ArtifactKind, CompletionBroker, ResultOptions, SubmissionStatus, SubmitRequest, TestResult,
};

use crate::collaborators::{Collaborators, DomainClassifier, ScriptGenerator};
use crate::error::AdvanceError;
use crate::sink::{EventSink, PipelineEvent, RecordKind};
use crate::{ago, PipelineConfig};

/// Result detail requested for the performance stage.
const PERFORMANCE_RESULT: ResultOptions = ResultOptions {
    requests: true,
    breakdown: false,
};

pub struct RunAdvancer {
    runs: Repo<Run>,
    comparisons: Repo<Comparison>,
    broker: Arc<CompletionBroker>,
    scripts: Arc<dyn ScriptGenerator>,
    classifier: Arc<dyn DomainClassifier>,
    sink: EventSink,
    config: PipelineConfig,
}

impl RunAdvancer {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        broker: Arc<CompletionBroker>,
        collaborators: &Collaborators,
        sink: EventSink,
        config: PipelineConfig,
    ) -> Self {
        Self {
            runs: Repo::new(Arc::clone(&store)),
            comparisons: Repo::new(store),
            broker,
            scripts: Arc::clone(&collaborators.scripts),
            classifier: Arc::clone(&collaborators.classifier),
            sink,
            config,
        }
    }

    /// Entry point for webhooks and the sweep.
    ///
    /// A finished run is re-announced only while its comparison is still
    /// unfinished, which recovers a lost notification without looping.
    pub async fn next(&self, run_id: &str) -> Result<(), AdvanceError> {
        let run = self.runs.load(run_id).await?.entity;
        if run.finished {
            return self.renotify_if_awaited(&run).await;
        }
        self.step(run).await
    }

    /// Entry point for the owning comparison. No-op on finished runs.
    pub async fn advance(&self, run_id: &str) -> Result<(), AdvanceError> {
        let run = self.runs.load(run_id).await?.entity;
        if run.finished {
            return Ok(());
        }
        self.step(run).await
    }

    /// A completion handle for `submission_id` settled (webhook or poll).
    ///
    /// Confirms the terminal status with the service, completes the owning
    /// stage, and advances the run. A failed status check finishes the run
    /// without data.
    pub async fn on_result(&self, submission_id: &str) -> Result<(), AdvanceError> {
        let needle = serde_json::json!({ "submission_id": submission_id });
        let owners = self.runs.find_containing(STAGES_FIELD, &needle).await?;
        let Some(run) = owners.into_iter().next().map(|v| v.entity) else {
            tracing::warn!(submission_id, "Result for unknown submission");
            return Ok(());
        };
        if run.finished {
            return Ok(());
        }

        let status = match self.broker.service().status(submission_id).await {
            Ok(status) => status,
            Err(e) => {
                tracing::error!(
                    run_id = %run.id,
                    submission_id,
                    error = %e,
                    "Status check after completion failed",
                );
                self.fail(&run.id, format!("status check failed: {e}")).await?;
                return Ok(());
            }
        };
        if !status.is_terminal() {
            tracing::debug!(
                run_id = %run.id,
                submission_id,
                ?status,
                "Result signalled before terminal status",
            );
            return Ok(());
        }

        self.complete_stage(&run.id, submission_id, status).await?;
        self.advance(&run.id).await
    }

    /// Sweep entry point: count a retry, give up past `max_retries`,
    /// otherwise advance.
    pub async fn retry(&self, run_id: &str, max_retries: u32) -> Result<(), AdvanceError> {
        let update = self
            .runs
            .update(run_id, |r| {
                if r.finished {
                    return false;
                }
                r.retry_count += 1;
                true
            })
            .await?;
        if !update.changed {
            return Ok(());
        }

        let run = update.record.entity;
        if run.retry_count > max_retries {
            tracing::warn!(
                run_id,
                retry_count = run.retry_count,
                max_retries,
                "Run exceeded sweep retries, finishing without data",
            );
            self.fail(run_id, format!("abandoned after {max_retries} sweep retries"))
                .await?;
            return Ok(());
        }
        self.step(run).await
    }

    // ---- private helpers ----

    async fn renotify_if_awaited(&self, run: &Run) -> Result<(), AdvanceError> {
        let owners = self.comparisons.find_containing(RUNS_FIELD, &run.id).await?;
        if owners.iter().any(|c| !c.entity.finished) {
            tracing::debug!(run_id = %run.id, "Re-notifying finished run");
            self.sink.finished(RecordKind::Run, run.id.clone());
        }
        Ok(())
    }

    async fn step(&self, mut run: Run) -> Result<(), AdvanceError> {
        let cutoff = ago(self.config.claim_timeout);
        if run.has_stale_claims(cutoff) {
            let update = self
                .runs
                .update(&run.id, |r| !r.finished && r.release_stale_claims(cutoff))
                .await?;
            if update.changed {
                tracing::warn!(run_id = %run.id, "Released stale stage claim");
            }
            run = update.record.entity;
            if run.finished {
                return Ok(());
            }
        }

        let outstanding: Vec<String> = run
            .outstanding_stages()
            .filter_map(|s| s.submission_id.clone())
            .collect();
        if !outstanding.is_empty() {
            let mut waiting = false;
            for submission_id in &outstanding {
                match self.broker.service().status(submission_id).await {
                    Ok(status) if status.is_terminal() => {
                        self.complete_stage(&run.id, submission_id, status).await?;
                    }
                    Ok(_) => waiting = true,
                    Err(e) => {
                        tracing::warn!(
                            run_id = %run.id,
                            submission_id = %submission_id,
                            error = %e,
                            "Status check failed",
                        );
                        waiting = true;
                    }
                }
            }
            if waiting {
                return Ok(());
            }
            run = self.runs.load(&run.id).await?.entity;
            if run.finished {
                return Ok(());
            }
        }

        match run.next_stage_to_start() {
            Some(kind) => self.start_stage(&run, kind).await,
            // A claimed stage is being submitted by another call.
            None => Ok(()),
        }
    }

    async fn start_stage(&self, run: &Run, kind: StageKind) -> Result<(), AdvanceError> {
        let now = Utc::now();
        let claim = self
            .runs
            .update(&run.id, |r| {
                if r.finished || r.next_stage_to_start() != Some(kind) {
                    return false;
                }
                r.stages.push(Stage::claimed(kind, now));
                true
            })
            .await?;
        if !claim.changed {
            tracing::debug!(run_id = %run.id, stage = %kind, "Stage already claimed");
            return Ok(());
        }

        let request = SubmitRequest {
            url: run.url.clone(),
            script: self.scripts.generate(&run.url, run.variant, kind),
            options: run.options.clone(),
            label: format!("{}:{kind}", run.id),
        };
        let completion = match self.broker.submit(&request).await {
            Ok(completion) => completion,
            Err(e) => {
                tracing::error!(
                    run_id = %run.id,
                    stage = %kind,
                    error = %e,
                    "Stage submission failed",
                );
                self.fail(&run.id, format!("{kind} submission failed: {e}"))
                    .await?;
                return Ok(());
            }
        };
        let submission_id = completion.submission_id().to_string();

        let recorded = self
            .runs
            .update(&run.id, |r| match r.stage_mut(kind) {
                Some(stage) if stage.submission_id.is_none() && !stage.finished => {
                    stage.submission_id = Some(submission_id.clone());
                    true
                }
                _ => false,
            })
            .await?;
        if !recorded.changed {
            tracing::warn!(
                run_id = %run.id,
                stage = %kind,
                submission_id = %submission_id,
                "Stage claim lost before submission was recorded",
            );
            // Dropping the handle ends its poll loop.
            return Ok(());
        }

        tracing::info!(
            run_id = %run.id,
            stage = %kind,
            submission_id = %submission_id,
            "Stage submitted",
        );
        self.sink.emit(PipelineEvent::Submitted {
            run_id: run.id.clone(),
            completion,
        });
        Ok(())
    }

    /// Complete the stage owning `submission_id` given its terminal status.
    async fn complete_stage(
        &self,
        run_id: &str,
        submission_id: &str,
        status: SubmissionStatus,
    ) -> Result<(), AdvanceError> {
        let run = self.runs.load(run_id).await?.entity;
        let Some(stage) = run.stage_by_submission(submission_id) else {
            return Ok(());
        };
        if run.finished || stage.finished {
            return Ok(());
        }
        let kind = stage.kind;

        match status {
            SubmissionStatus::Error { code, text } => {
                tracing::warn!(
                    run_id,
                    stage = %kind,
                    submission_id,
                    code,
                    %text,
                    "Stage failed remotely",
                );
                let reason = format!("{kind} failed remotely ({code}): {text}");
                let now = Utc::now();
                let update = self
                    .runs
                    .update(run_id, |r| {
                        if r.finished {
                            return false;
                        }
                        if let Some(stage) = r.stage_mut(kind) {
                            stage.finished = true;
                            stage.error = Some(reason.clone());
                        }
                        r.fail_finish(reason.clone(), now);
                        true
                    })
                    .await?;
                if update.changed {
                    self.sink.finished(RecordKind::Run, run_id);
                }
            }
            SubmissionStatus::Complete if kind == StageKind::Performance => {
                self.finish_performance(&run, submission_id).await?;
            }
            SubmissionStatus::Complete => {
                let update = self
                    .runs
                    .update(run_id, |r| match r.stage_mut(kind) {
                        Some(stage)
                            if !stage.finished
                                && stage.submission_id.as_deref() == Some(submission_id) =>
                        {
                            stage.finished = true;
                            true
                        }
                        _ => false,
                    })
                    .await?;
                if update.changed {
                    tracing::info!(run_id, stage = %kind, submission_id, "Stage finished");
                }
            }
            SubmissionStatus::Queued | SubmissionStatus::Running => {}
        }
        Ok(())
    }

    async fn finish_performance(&self, run: &Run, submission_id: &str) -> Result<(), AdvanceError> {
        let outcome: Result<(Metrics, Option<u32>), String> = match self
            .broker
            .service()
            .fetch_result(submission_id, PERFORMANCE_RESULT)
            .await
        {
            Ok(result) => match result.metrics(submission_id) {
                Ok(metrics) => Ok((metrics, self.count_ad_requests(&result).await)),
                Err(e) => {
                    tracing::warn!(run_id = %run.id, error = %e, "Performance result unusable");
                    Err(e.to_string())
                }
            },
            Err(e) => {
                tracing::error!(
                    run_id = %run.id,
                    submission_id,
                    error = %e,
                    "Fetching performance result failed",
                );
                Err(format!("result fetch failed: {e}"))
            }
        };

        let video_id = if outcome.is_ok() {
            self.fetch_video(&run.id, submission_id).await
        } else {
            None
        };

        let now = Utc::now();
        let update = self
            .runs
            .update(&run.id, |r| {
                if r.finished {
                    return false;
                }
                match r.stage_mut(StageKind::Performance) {
                    Some(stage) if stage.submission_id.as_deref() == Some(submission_id) => {
                        stage.finished = true;
                    }
                    _ => return false,
                }
                match &outcome {
                    Ok((metrics, ad_requests)) => {
                        r.finish_with(metrics.clone(), now);
                        r.ad_requests = *ad_requests;
                        r.video_id = video_id.clone();
                    }
                    Err(reason) => r.fail_finish(reason.clone(), now),
                }
                true
            })
            .await?;

        if update.changed {
            tracing::info!(
                run_id = %run.id,
                data_missing = update.entity().data_missing,
                "Run finished",
            );
            self.sink.finished(RecordKind::Run, run.id.clone());
        }
        Ok(())
    }

    /// Finish a run without data. Returns whether this call finished it.
    async fn fail(&self, run_id: &str, reason: String) -> Result<bool, AdvanceError> {
        let now = Utc::now();
        let update = self
            .runs
            .update(run_id, |r| {
                if r.finished {
                    return false;
                }
                r.fail_finish(reason.clone(), now);
                true
            })
            .await?;
        if update.changed {
            self.sink.finished(RecordKind::Run, run_id);
        }
        Ok(update.changed)
    }

    /// Best effort: number of requests to ad domains, `None` when unknown.
    async fn count_ad_requests(&self, result: &TestResult) -> Option<u32> {
        let hosts = result.request_hosts();
        if hosts.is_empty() {
            return None;
        }
        let classify = async {
            let mut count = 0u32;
            for host in &hosts {
                match self.classifier.is_ad_domain(host).await {
                    Ok(true) => count += 1,
                    Ok(false) => {}
                    Err(e) => tracing::debug!(host = %host, error = %e, "Host classification failed"),
                }
            }
            count
        };
        match tokio::time::timeout(self.config.aux_timeout, classify).await {
            Ok(count) => Some(count),
            Err(_) => {
                tracing::warn!("Ad-domain classification timed out");
                None
            }
        }
    }

    /// Best effort: request the load video. Never fails the run.
    async fn fetch_video(&self, run_id: &str, submission_id: &str) -> Option<String> {
        let request = self
            .broker
            .service()
            .fetch_artifact(submission_id, ArtifactKind::Video);
        match tokio::time::timeout(self.config.aux_timeout, request).await {
            Ok(Ok(video_id)) => video_id,
            Ok(Err(e)) => {
                tracing::warn!(run_id, submission_id, error = %e, "Video request failed");
                None
            }
            Err(_) => {
                tracing::warn!(run_id, submission_id, "Video request timed out");
                None
            }
        }
    }
}
