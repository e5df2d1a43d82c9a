//! Periodic resilience sweep.
//!
//! Re-invokes `next` on unfinished records that have not changed for a
//! while, recovering from lost webhooks and interrupted calls. Records idle
//! longer than the abandon window are left alone. Runs additionally count
//! each sweep as a retry and are finished without data past the cap.

use std::time::Duration;

use chrono::Utc;
use pagebench_db::models::Run;
use pagebench_db::{Entity, Repo};

use crate::error::{AdvanceError, StaleRecordError};
use crate::orchestrator::Orchestrator;
use crate::sink::RecordKind;
use crate::ago;

/// Default idle time before a record is swept.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(300);

/// Default idle time after which a record is no longer swept.
pub const DEFAULT_ABANDON_AFTER: Duration = Duration::from_secs(86_400);

/// Default sweep retries before a run is finished without data.
pub const DEFAULT_MAX_RUN_RETRIES: u32 = 12;

#[derive(Debug, Clone, Copy)]
pub struct SweepConfig {
    pub stale_after: Duration,
    pub abandon_after: Duration,
    pub max_run_retries: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            stale_after: DEFAULT_STALE_AFTER,
            abandon_after: DEFAULT_ABANDON_AFTER,
            max_run_retries: DEFAULT_MAX_RUN_RETRIES,
        }
    }
}

/// Number of records re-advanced per level by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub runs: usize,
    pub comparisons: usize,
    pub series: usize,
    pub batches: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.runs + self.comparisons + self.series + self.batches
    }
}

fn idle_for(updated_at: pagebench_core::types::Timestamp) -> Duration {
    (Utc::now() - updated_at).to_std().unwrap_or_default()
}

impl Orchestrator {
    /// One sweep over all four levels, leaves first.
    ///
    /// Per-record failures are logged; only a failed stale query aborts.
    pub async fn sweep(&self, config: &SweepConfig) -> Result<SweepReport, AdvanceError> {
        let before = ago(config.stale_after);
        let after = ago(config.abandon_after);

        let mut report = SweepReport::default();
        for record in self.runs.find_stale(before, after).await? {
            let stale = StaleRecordError {
                kind: Run::KIND,
                id: record.entity.id.clone(),
                idle: idle_for(record.updated_at),
                retry_count: record.entity.retry_count,
            };
            tracing::info!(
                error = %stale,
                retry_count = stale.retry_count,
                "Re-advancing stale record",
            );
            if let Err(e) = self
                .run_advancer
                .retry(&stale.id, config.max_run_retries)
                .await
            {
                tracing::warn!(run_id = %stale.id, error = %e, "Stale run retry failed");
            }
            report.runs += 1;
        }

        report.comparisons = self
            .sweep_level(&self.comparisons, RecordKind::Comparison, before, after)
            .await?;
        report.series = self
            .sweep_level(&self.series, RecordKind::Series, before, after)
            .await?;
        report.batches = self
            .sweep_level(&self.batches, RecordKind::Batch, before, after)
            .await?;

        if report.total() > 0 {
            tracing::info!(
                runs = report.runs,
                comparisons = report.comparisons,
                series = report.series,
                batches = report.batches,
                "Stale sweep complete",
            );
        }
        Ok(report)
    }

    async fn sweep_level<T: Entity>(
        &self,
        repo: &Repo<T>,
        kind: RecordKind,
        before: pagebench_core::types::Timestamp,
        after: pagebench_core::types::Timestamp,
    ) -> Result<usize, AdvanceError> {
        let stale = repo.find_stale(before, after).await?;
        for record in &stale {
            let stale = StaleRecordError {
                kind: T::KIND,
                id: record.entity.id().to_string(),
                idle: idle_for(record.updated_at),
                retry_count: 0,
            };
            tracing::debug!(error = %stale, "Re-advancing stale record");
            self.next_logged(kind, &stale.id).await;
        }
        Ok(stale.len())
    }
}
