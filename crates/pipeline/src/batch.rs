//! Advancing a batch: one series per requested URL, processed in order.

use std::sync::Arc;

use chrono::Utc;
use pagebench_db::models::batch::next_pending_spec;
use pagebench_db::models::{Batch, Series, SeriesSpec};
use pagebench_db::{DocumentStore, Entity, Repo};

use crate::error::AdvanceError;
use crate::series::SeriesAdvancer;
use crate::sink::{EventSink, RecordKind};

pub struct BatchAdvancer {
    batches: Repo<Batch>,
    series: Repo<Series>,
    series_advancer: Arc<SeriesAdvancer>,
    sink: EventSink,
}

impl BatchAdvancer {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        series_advancer: Arc<SeriesAdvancer>,
        sink: EventSink,
    ) -> Self {
        Self {
            batches: Repo::new(Arc::clone(&store)),
            series: Repo::new(store),
            series_advancer,
            sink,
        }
    }

    pub async fn next(&self, batch_id: &str) -> Result<(), AdvanceError> {
        let batch = self.batches.load(batch_id).await?.entity;
        if batch.finished {
            tracing::debug!(batch_id, "Batch already finished");
            return Ok(());
        }

        if let Some(last_id) = batch.last_series() {
            let index = batch.series.len() - 1;
            let last = match self.series.find(last_id).await? {
                Some(found) => found.entity,
                None => self.materialize(&batch, index).await?,
            };
            if !last.finished {
                return self.series_advancer.next(&last.id).await;
            }
        }

        let mut realized_urls = Vec::with_capacity(batch.series.len());
        for series_id in &batch.series {
            realized_urls.push(self.series.load(series_id).await?.entity.url);
        }

        match next_pending_spec(&batch.requested, &realized_urls) {
            None => self.finish(&batch).await,
            Some(spec) => self.append_and_advance(&batch, spec).await,
        }
    }

    /// Create the series for a reserved slot that has no record yet.
    async fn materialize(&self, batch: &Batch, index: usize) -> Result<Series, AdvanceError> {
        let spec = batch
            .requested
            .get(index)
            .ok_or_else(|| AdvanceError::Inconsistent {
                kind: Batch::KIND,
                id: batch.id.clone(),
                reason: format!("series slot {index} has no matching request"),
            })?;
        Ok(self
            .series
            .create_or_get(&batch.series_at(index, spec))
            .await?
            .entity)
    }

    async fn append_and_advance(
        &self,
        batch: &Batch,
        spec: &SeriesSpec,
    ) -> Result<(), AdvanceError> {
        let index = batch.series.len();
        let expected_last = batch.last_series().map(str::to_string);
        let child_id = batch.series_id(index);

        let update = self
            .batches
            .update(&batch.id, |b| {
                if b.finished
                    || b.series.len() != index
                    || b.last_series() != expected_last.as_deref()
                {
                    return false;
                }
                b.series.push(child_id.clone());
                true
            })
            .await?;

        if update.entity().series.get(index) != Some(&child_id) {
            tracing::debug!(batch_id = %batch.id, index, "Batch moved on concurrently");
            return Ok(());
        }
        if update.changed {
            tracing::info!(
                batch_id = %batch.id,
                series_id = %child_id,
                url = %spec.url,
                index,
                "Series appended",
            );
        }

        self.series
            .create_or_get(&batch.series_at(index, spec))
            .await?;
        self.series_advancer.next(&child_id).await
    }

    async fn finish(&self, batch: &Batch) -> Result<(), AdvanceError> {
        let now = Utc::now();
        let update = self
            .batches
            .update(&batch.id, |b| {
                if b.finished {
                    return false;
                }
                b.finished = true;
                b.finished_at = Some(now);
                true
            })
            .await?;

        if update.changed {
            tracing::info!(
                batch_id = %batch.id,
                series = batch.series.len(),
                "Batch finished",
            );
            self.sink.finished(RecordKind::Batch, batch.id.clone());
        }
        Ok(())
    }
}
