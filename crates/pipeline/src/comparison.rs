//! Advancing a baseline/variant run pair.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use pagebench_core::cache::TtlCache;
use pagebench_core::factors::compute_factors;
use pagebench_core::metrics::Metrics;
use pagebench_db::models::{Comparison, Run};
use pagebench_db::{DocumentStore, Repo};

use crate::collaborators::{Collaborators, InsightProvider};
use crate::error::AdvanceError;
use crate::run::RunAdvancer;
use crate::sink::{EventSink, RecordKind};
use crate::PipelineConfig;

pub struct ComparisonAdvancer {
    comparisons: Repo<Comparison>,
    runs: Repo<Run>,
    run_advancer: Arc<RunAdvancer>,
    insights: Arc<dyn InsightProvider>,
    insight_cache: Arc<TtlCache<(String, bool), serde_json::Value>>,
    sink: EventSink,
    config: PipelineConfig,
}

impl ComparisonAdvancer {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        run_advancer: Arc<RunAdvancer>,
        collaborators: &Collaborators,
        sink: EventSink,
        config: PipelineConfig,
    ) -> Self {
        Self {
            comparisons: Repo::new(Arc::clone(&store)),
            runs: Repo::new(store),
            run_advancer,
            insights: Arc::clone(&collaborators.insights),
            insight_cache: Arc::clone(&collaborators.insight_cache),
            sink,
            config,
        }
    }

    /// Advance both runs; once both finished, compute factors and finish.
    pub async fn next(&self, comparison_id: &str) -> Result<(), AdvanceError> {
        let comparison = self.comparisons.load(comparison_id).await?.entity;
        if comparison.finished {
            tracing::debug!(comparison_id, "Comparison already finished");
            return Ok(());
        }

        for run in comparison.new_runs() {
            if self.runs.find(&run.id).await?.is_none() {
                self.runs.create_or_get(&run).await?;
            }
        }

        let advances = comparison.runs.iter().map(|run_id| async move {
            if let Err(e) = self.run_advancer.advance(run_id).await {
                tracing::warn!(comparison_id, run_id = %run_id, error = %e, "Run advance failed");
            }
        });
        join_all(advances).await;

        if !comparison.insights_requested {
            self.request_insights(&comparison).await?;
        }

        let baseline = self.runs.load(comparison.baseline_run()).await?.entity;
        let variant = self.runs.load(comparison.variant_run()).await?.entity;
        if !(baseline.finished && variant.finished) {
            return Ok(());
        }

        let factors = compute_factors(usable_metrics(&baseline), usable_metrics(&variant));
        let now = Utc::now();
        let update = self
            .comparisons
            .update(comparison_id, |c| {
                if c.finished {
                    return false;
                }
                c.finished = true;
                c.factors = Some(factors.clone());
                c.finished_at = Some(now);
                true
            })
            .await?;

        if update.changed {
            tracing::info!(
                comparison_id,
                factors_absent = factors.is_absent(),
                "Comparison finished",
            );
            self.sink.finished(RecordKind::Comparison, comparison_id);
        }
        Ok(())
    }

    /// Claim the one-shot insight task and run it in the background.
    async fn request_insights(&self, comparison: &Comparison) -> Result<(), AdvanceError> {
        let claim = self
            .comparisons
            .update(&comparison.id, |c| {
                if c.insights_requested {
                    return false;
                }
                c.insights_requested = true;
                true
            })
            .await?;
        if !claim.changed {
            return Ok(());
        }

        let comparisons = self.comparisons.clone();
        let provider = Arc::clone(&self.insights);
        let cache = Arc::clone(&self.insight_cache);
        let timeout = self.config.aux_timeout;
        let id = comparison.id.clone();
        let key = (comparison.url.clone(), comparison.options.mobile);

        tokio::spawn(async move {
            let insights = match cache.get(&key) {
                Some(hit) => Some(hit),
                None => match tokio::time::timeout(timeout, provider.fetch(&key.0, key.1)).await {
                    Ok(Ok(Some(value))) => {
                        cache.insert(key.clone(), value.clone());
                        Some(value)
                    }
                    Ok(Ok(None)) => None,
                    Ok(Err(e)) => {
                        tracing::warn!(comparison_id = %id, error = %e, "Insight fetch failed");
                        None
                    }
                    Err(_) => {
                        tracing::warn!(comparison_id = %id, "Insight fetch timed out");
                        None
                    }
                },
            };
            let Some(insights) = insights else {
                return;
            };
            let stored = comparisons
                .update(&id, |c| {
                    if c.insights.is_some() {
                        return false;
                    }
                    c.insights = Some(insights.clone());
                    true
                })
                .await;
            if let Err(e) = stored {
                tracing::warn!(comparison_id = %id, error = %e, "Storing insights failed");
            }
        });
        Ok(())
    }
}

/// Metrics usable for factors: none when the run is missing data.
fn usable_metrics(run: &Run) -> Option<&Metrics> {
    if run.data_missing {
        None
    } else {
        run.metrics.as_ref()
    }
}
