//! Run: one benchmark execution (baseline or accelerated variant).

use pagebench_core::metrics::Metrics;
use pagebench_core::options::{stage_plan, StageKind, TestOptions};
use pagebench_core::types::{EntityId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::repo::Entity;

/// Name of the array field holding stages (lookup by submission id).
pub const STAGES_FIELD: &str = "stages";

/// One staged remote submission within a run.
///
/// A stage is recorded (claimed) before its submission is sent, so
/// `submission_id` is `None` for the short window between the claim and
/// the remote service acknowledging the script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub kind: StageKind,
    pub submission_id: Option<String>,
    pub claimed_at: Timestamp,
    pub finished: bool,
    /// Set when the remote service reported an error for this stage.
    pub error: Option<String>,
}

impl Stage {
    pub fn claimed(kind: StageKind, at: Timestamp) -> Self {
        Self {
            kind,
            submission_id: None,
            claimed_at: at,
            finished: false,
            error: None,
        }
    }

    /// Submitted and waiting for the remote service.
    pub fn is_outstanding(&self) -> bool {
        !self.finished && self.submission_id.is_some()
    }
}

/// Coarse lifecycle position derived from the stage list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    New,
    Staging,
    PerformancePending,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: EntityId,
    pub url: String,
    /// `true` for the accelerated run, `false` for the baseline.
    pub variant: bool,
    pub options: TestOptions,
    pub stages: Vec<Stage>,
    pub finished: bool,
    pub data_missing: bool,
    pub retry_count: u32,
    pub metrics: Option<Metrics>,
    pub video_id: Option<String>,
    /// Requests to ad domains during the performance stage, when known.
    #[serde(default)]
    pub ad_requests: Option<u32>,
    /// Why the run finished without data, if it did.
    pub failure: Option<String>,
    pub finished_at: Option<Timestamp>,
}

impl Run {
    pub fn new(id: EntityId, url: impl Into<String>, variant: bool, options: TestOptions) -> Self {
        Self {
            id,
            url: url.into(),
            variant,
            options,
            stages: Vec::new(),
            finished: false,
            data_missing: false,
            retry_count: 0,
            metrics: None,
            video_id: None,
            ad_requests: None,
            failure: None,
            finished_at: None,
        }
    }

    pub fn stage(&self, kind: StageKind) -> Option<&Stage> {
        self.stages.iter().find(|s| s.kind == kind)
    }

    pub fn stage_mut(&mut self, kind: StageKind) -> Option<&mut Stage> {
        self.stages.iter_mut().find(|s| s.kind == kind)
    }

    pub fn stage_by_submission(&self, submission_id: &str) -> Option<&Stage> {
        self.stages
            .iter()
            .find(|s| s.submission_id.as_deref() == Some(submission_id))
    }

    /// Claims older than `before` whose submission never went out.
    pub fn has_stale_claims(&self, before: Timestamp) -> bool {
        self.stages
            .iter()
            .any(|s| !s.finished && s.submission_id.is_none() && s.claimed_at < before)
    }

    /// Drop stale unsubmitted claims so the stage can be claimed again.
    pub fn release_stale_claims(&mut self, before: Timestamp) -> bool {
        let len = self.stages.len();
        self.stages
            .retain(|s| s.finished || s.submission_id.is_some() || s.claimed_at >= before);
        self.stages.len() != len
    }

    pub fn outstanding_stages(&self) -> impl Iterator<Item = &Stage> {
        self.stages.iter().filter(|s| s.is_outstanding())
    }

    /// The next planned stage to submit, if every earlier stage finished
    /// and it has not been claimed yet.
    pub fn next_stage_to_start(&self) -> Option<StageKind> {
        for kind in stage_plan(self.variant) {
            match self.stage(*kind) {
                Some(stage) if stage.finished => continue,
                Some(_) => return None,
                None => return Some(*kind),
            }
        }
        None
    }

    pub fn phase(&self) -> RunPhase {
        if self.finished {
            return RunPhase::Finished;
        }
        match self.stage(StageKind::Performance) {
            Some(_) => RunPhase::PerformancePending,
            None if self.stages.is_empty() => RunPhase::New,
            None => RunPhase::Staging,
        }
    }

    /// Finish with collected metrics.
    pub fn finish_with(&mut self, metrics: Metrics, at: Timestamp) {
        self.data_missing = metrics.is_empty();
        self.metrics = Some(metrics);
        self.finished = true;
        self.finished_at = Some(at);
    }

    /// Finish without data. Runs never stay pending on errors so the
    /// hierarchy above can always complete.
    pub fn fail_finish(&mut self, reason: impl Into<String>, at: Timestamp) {
        self.finished = true;
        self.data_missing = true;
        self.failure = Some(reason.into());
        self.finished_at = Some(at);
    }
}

impl Entity for Run {
    const KIND: &'static str = "run";

    fn id(&self) -> &str {
        &self.id
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pagebench_core::metrics::Metric;

    use super::*;

    fn variant_run() -> Run {
        Run::new("r".into(), "https://example.com", true, TestOptions::default())
    }

    #[test]
    fn variant_starts_with_warmup_and_waits_for_it() {
        let mut run = variant_run();
        assert_eq!(run.phase(), RunPhase::New);
        assert_eq!(run.next_stage_to_start(), Some(StageKind::Warmup));

        run.stages.push(Stage::claimed(StageKind::Warmup, Utc::now()));
        assert_eq!(run.phase(), RunPhase::Staging);
        assert_eq!(run.next_stage_to_start(), None);

        run.stage_mut(StageKind::Warmup).unwrap().finished = true;
        assert_eq!(run.next_stage_to_start(), Some(StageKind::ConfigProbe));
    }

    #[test]
    fn baseline_goes_straight_to_performance() {
        let mut run = Run::new("r".into(), "https://example.com", false, TestOptions::default());
        assert_eq!(run.next_stage_to_start(), Some(StageKind::Performance));

        run.stages.push(Stage::claimed(StageKind::Performance, Utc::now()));
        assert_eq!(run.phase(), RunPhase::PerformancePending);
    }

    #[test]
    fn claimed_stage_is_not_outstanding_until_submitted() {
        let mut stage = Stage::claimed(StageKind::Performance, Utc::now());
        assert!(!stage.is_outstanding());
        stage.submission_id = Some("sub".into());
        assert!(stage.is_outstanding());
    }

    #[test]
    fn stale_claims_are_released() {
        let mut run = variant_run();
        let old = Utc::now() - chrono::Duration::minutes(10);
        run.stages.push(Stage::claimed(StageKind::Warmup, old));

        let cutoff = Utc::now() - chrono::Duration::minutes(5);
        assert!(run.has_stale_claims(cutoff));
        assert!(run.release_stale_claims(cutoff));
        assert!(run.stages.is_empty());
        assert_eq!(run.next_stage_to_start(), Some(StageKind::Warmup));
    }

    #[test]
    fn submitted_claims_are_kept() {
        let mut run = variant_run();
        let old = Utc::now() - chrono::Duration::minutes(10);
        let mut stage = Stage::claimed(StageKind::Warmup, old);
        stage.submission_id = Some("sub".into());
        run.stages.push(stage);

        assert!(!run.release_stale_claims(Utc::now()));
        assert_eq!(run.stages.len(), 1);
    }

    #[test]
    fn finish_with_empty_metrics_marks_data_missing() {
        let mut run = variant_run();
        run.finish_with(Metrics::new(), Utc::now());
        assert!(run.finished);
        assert!(run.data_missing);

        let mut run = variant_run();
        run.finish_with(Metrics::new().with(Metric::LoadTime, 900.0), Utc::now());
        assert!(!run.data_missing);
        assert_eq!(run.phase(), RunPhase::Finished);
    }
}
