//! Periodic stale-record sweep.
//!
//! Re-advances unfinished records that stopped moving, recovering from
//! lost webhooks and interrupted advancement. Runs on a fixed interval
//! using `tokio::time::interval`.

use std::sync::Arc;
use std::time::Duration;

use pagebench_pipeline::{Orchestrator, SweepConfig};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Run the sweep loop until `cancel` is triggered.
pub async fn run(
    orchestrator: Arc<Orchestrator>,
    config: SweepConfig,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        stale_after_secs = config.stale_after.as_secs(),
        max_run_retries = config.max_run_retries,
        "Stale sweep started",
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Stale sweep stopping");
                break;
            }
            _ = ticker.tick() => {
                match orchestrator.sweep(&config).await {
                    Ok(report) if report.total() > 0 => {
                        tracing::debug!(swept = report.total(), "Stale sweep pass finished");
                    }
                    Ok(_) => tracing::trace!("Stale sweep: nothing to do"),
                    Err(e) => tracing::error!(error = %e, "Stale sweep failed"),
                }
            }
        }
    }
}
