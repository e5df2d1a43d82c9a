//! Advancing a series of repeated comparisons for one URL.
//!
//! Comparisons run one at a time. The next one is appended only once the
//! previous one finished; the series finishes after `repetitions`
//! comparisons, aggregating their factors.

use std::sync::Arc;

use chrono::Utc;
use pagebench_core::factors::summarize;
use pagebench_db::models::{Comparison, Series};
use pagebench_db::{DocumentStore, Repo};

use crate::comparison::ComparisonAdvancer;
use crate::error::AdvanceError;
use crate::sink::{EventSink, RecordKind};

pub struct SeriesAdvancer {
    series: Repo<Series>,
    comparisons: Repo<Comparison>,
    comparison_advancer: Arc<ComparisonAdvancer>,
    sink: EventSink,
}

impl SeriesAdvancer {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        comparison_advancer: Arc<ComparisonAdvancer>,
        sink: EventSink,
    ) -> Self {
        Self {
            series: Repo::new(Arc::clone(&store)),
            comparisons: Repo::new(store),
            comparison_advancer,
            sink,
        }
    }

    pub async fn next(&self, series_id: &str) -> Result<(), AdvanceError> {
        let series = self.series.load(series_id).await?.entity;
        if series.finished {
            return Ok(());
        }

        let Some(last_id) = series.last_comparison() else {
            return self.append_and_advance(&series).await;
        };

        // The slot may have been reserved by a call that stopped before
        // creating the comparison.
        let index = series.comparisons.len() - 1;
        let last = match self.comparisons.find(last_id).await? {
            Some(found) => found.entity,
            None => {
                self.comparisons
                    .create_or_get(&series.comparison_at(index))
                    .await?
                    .entity
            }
        };

        if !last.finished {
            return self.comparison_advancer.next(&last.id).await;
        }
        if series.is_complete() {
            return self.finish(&series).await;
        }
        self.append_and_advance(&series).await
    }

    /// Reserve the next comparison slot, create the comparison, and start it.
    async fn append_and_advance(&self, series: &Series) -> Result<(), AdvanceError> {
        let index = series.comparisons.len();
        let expected_last = series.last_comparison().map(str::to_string);
        let child_id = series.comparison_id(index);

        let update = self
            .series
            .update(&series.id, |s| {
                if s.finished
                    || s.comparisons.len() != index
                    || s.last_comparison() != expected_last.as_deref()
                {
                    return false;
                }
                s.comparisons.push(child_id.clone());
                true
            })
            .await?;

        // Deterministic ids: a concurrent caller that won the race reserved
        // the same child, and either may create it.
        if update.entity().comparisons.get(index) != Some(&child_id) {
            tracing::debug!(series_id = %series.id, index, "Series moved on concurrently");
            return Ok(());
        }
        if update.changed {
            tracing::info!(
                series_id = %series.id,
                comparison_id = %child_id,
                index,
                "Comparison appended",
            );
        }

        self.comparisons
            .create_or_get(&series.comparison_at(index))
            .await?;
        self.comparison_advancer.next(&child_id).await
    }

    async fn finish(&self, series: &Series) -> Result<(), AdvanceError> {
        let mut factor_sets = Vec::with_capacity(series.comparisons.len());
        for comparison_id in &series.comparisons {
            if let Some(factors) = self.comparisons.load(comparison_id).await?.entity.factors {
                factor_sets.push(factors);
            }
        }
        let summary = summarize(&factor_sets);

        let now = Utc::now();
        let update = self
            .series
            .update(&series.id, |s| {
                if s.finished {
                    return false;
                }
                s.finished = true;
                s.summary = Some(summary.clone());
                s.finished_at = Some(now);
                true
            })
            .await?;

        if update.changed {
            tracing::info!(
                series_id = %series.id,
                comparisons = series.comparisons.len(),
                samples = summary.samples,
                "Series finished",
            );
            self.sink.finished(RecordKind::Series, series.id.clone());
        }
        Ok(())
    }
}
