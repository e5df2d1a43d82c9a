//! Wiring between the advancers, the store, the broker, and the bus.
//!
//! [`Orchestrator`] builds the advancer chain, creates top-level records,
//! and runs the dispatch loop that turns [`PipelineEvent`]s into parent
//! `next` calls. It is held in application state as an
//! `Arc<Orchestrator>`.

use std::sync::Arc;
use std::time::Duration;

use pagebench_core::error::CoreError;
use pagebench_core::options::{validate_repetitions, TestOptions};
use pagebench_core::types::EntityId;
use pagebench_db::models::batch::SERIES_FIELD;
use pagebench_db::models::comparison::RUNS_FIELD;
use pagebench_db::models::series::COMPARISONS_FIELD;
use pagebench_db::models::{Batch, Comparison, Run, Series, SeriesSpec};
use pagebench_db::{DocumentStore, Repo};
use pagebench_events::{EventBus, JobEvent};
use pagebench_remote::{CompletionBroker, CompletionError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::batch::BatchAdvancer;
use crate::collaborators::Collaborators;
use crate::comparison::ComparisonAdvancer;
use crate::error::AdvanceError;
use crate::run::RunAdvancer;
use crate::series::SeriesAdvancer;
use crate::sink::{EventSink, PipelineEvent, RecordKind};
use crate::PipelineConfig;

/// Upper bound on specs in one batch.
pub const MAX_BATCH_SPECS: usize = 100;

/// How long the dispatch loop waits for in-flight handlers on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct Orchestrator {
    pub(crate) runs: Repo<Run>,
    pub(crate) comparisons: Repo<Comparison>,
    pub(crate) series: Repo<Series>,
    pub(crate) batches: Repo<Batch>,
    pub(crate) run_advancer: Arc<RunAdvancer>,
    comparison_advancer: Arc<ComparisonAdvancer>,
    series_advancer: Arc<SeriesAdvancer>,
    batch_advancer: Arc<BatchAdvancer>,
    broker: Arc<CompletionBroker>,
    bus: Arc<EventBus>,
    tasks: TaskTracker,
}

impl Orchestrator {
    /// Build the engine. The returned receiver must be handed to
    /// [`run_dispatch`](Self::run_dispatch).
    pub fn new(
        store: Arc<dyn DocumentStore>,
        broker: Arc<CompletionBroker>,
        bus: Arc<EventBus>,
        collaborators: Collaborators,
        config: PipelineConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (sink, events) = EventSink::channel();

        let run_advancer = Arc::new(RunAdvancer::new(
            Arc::clone(&store),
            Arc::clone(&broker),
            &collaborators,
            sink.clone(),
            config,
        ));
        let comparison_advancer = Arc::new(ComparisonAdvancer::new(
            Arc::clone(&store),
            Arc::clone(&run_advancer),
            &collaborators,
            sink.clone(),
            config,
        ));
        let series_advancer = Arc::new(SeriesAdvancer::new(
            Arc::clone(&store),
            Arc::clone(&comparison_advancer),
            sink.clone(),
        ));
        let batch_advancer = Arc::new(BatchAdvancer::new(
            Arc::clone(&store),
            Arc::clone(&series_advancer),
            sink,
        ));

        let orchestrator = Arc::new(Self {
            runs: Repo::new(Arc::clone(&store)),
            comparisons: Repo::new(Arc::clone(&store)),
            series: Repo::new(Arc::clone(&store)),
            batches: Repo::new(store),
            run_advancer,
            comparison_advancer,
            series_advancer,
            batch_advancer,
            broker,
            bus,
            tasks: TaskTracker::new(),
        });
        (orchestrator, events)
    }

    pub fn broker(&self) -> &Arc<CompletionBroker> {
        &self.broker
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    // ---- record creation ----

    /// Create a batch and start its first series.
    pub async fn create_batch(&self, specs: Vec<SeriesSpec>) -> Result<Batch, AdvanceError> {
        if specs.is_empty() || specs.len() > MAX_BATCH_SPECS {
            return Err(CoreError::Validation(format!(
                "a batch needs between 1 and {MAX_BATCH_SPECS} series, got {}",
                specs.len()
            ))
            .into());
        }
        for spec in &specs {
            validate_repetitions(spec.repetitions)?;
        }

        let id = self.batches.allocate_id().await?;
        self.batches.create(&Batch::new(id.clone(), specs)).await?;
        tracing::info!(batch_id = %id, "Batch created");

        self.next_logged(RecordKind::Batch, &id).await;
        Ok(self.batches.load(&id).await?.entity)
    }

    /// Create a standalone series and start its first comparison.
    pub async fn create_series(
        &self,
        url: String,
        repetitions: u32,
        options: TestOptions,
    ) -> Result<Series, AdvanceError> {
        validate_repetitions(repetitions)?;

        let id = self.series.allocate_id().await?;
        self.series
            .create(&Series::new(id.clone(), url, repetitions, options))
            .await?;
        tracing::info!(series_id = %id, repetitions, "Series created");

        self.next_logged(RecordKind::Series, &id).await;
        Ok(self.series.load(&id).await?.entity)
    }

    /// Create a standalone comparison and start both runs.
    pub async fn create_comparison(
        &self,
        url: String,
        options: TestOptions,
    ) -> Result<Comparison, AdvanceError> {
        let id = self.comparisons.allocate_id().await?;
        self.comparisons
            .create(&Comparison::new(id.clone(), url, options))
            .await?;
        tracing::info!(comparison_id = %id, "Comparison created");

        self.next_logged(RecordKind::Comparison, &id).await;
        Ok(self.comparisons.load(&id).await?.entity)
    }

    // ---- advancement ----

    /// Invoke the external `next` of the advancer for `kind`.
    pub async fn next(&self, kind: RecordKind, id: &str) -> Result<(), AdvanceError> {
        match kind {
            RecordKind::Run => self.run_advancer.next(id).await,
            RecordKind::Comparison => self.comparison_advancer.next(id).await,
            RecordKind::Series => self.series_advancer.next(id).await,
            RecordKind::Batch => self.batch_advancer.next(id).await,
        }
    }

    /// [`next`](Self::next), logging and swallowing failures.
    pub async fn next_logged(&self, kind: RecordKind, id: &str) {
        if let Err(e) = self.next(kind, id).await {
            tracing::warn!(kind = %kind, id, error = %e, "Advance failed");
        }
    }

    /// Inbound webhook for a remote submission.
    ///
    /// Settles the broker handle when a dispatcher task in this process
    /// waits on it (that task then completes the stage); otherwise the
    /// submission predates this process, or its waiter is gone, and it is
    /// completed directly.
    pub async fn on_webhook(&self, submission_id: &str) {
        if self.broker.on_webhook(submission_id) {
            return;
        }
        if let Err(e) = self.run_advancer.on_result(submission_id).await {
            tracing::warn!(submission_id, error = %e, "Webhook handling failed");
        }
    }

    /// Records one level up that contain `id`.
    pub async fn find_parents(
        &self,
        kind: RecordKind,
        id: &str,
    ) -> Result<Vec<(RecordKind, EntityId)>, AdvanceError> {
        let parents = match kind {
            RecordKind::Run => self
                .comparisons
                .find_containing(RUNS_FIELD, id)
                .await?
                .into_iter()
                .map(|c| (RecordKind::Comparison, c.entity.id))
                .collect(),
            RecordKind::Comparison => self
                .series
                .find_containing(COMPARISONS_FIELD, id)
                .await?
                .into_iter()
                .map(|s| (RecordKind::Series, s.entity.id))
                .collect(),
            RecordKind::Series => self
                .batches
                .find_containing(SERIES_FIELD, id)
                .await?
                .into_iter()
                .map(|b| (RecordKind::Batch, b.entity.id))
                .collect(),
            RecordKind::Batch => Vec::new(),
        };
        Ok(parents)
    }

    /// React to one pipeline event.
    pub async fn handle(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::Finished { kind, id } => {
                self.bus
                    .publish(JobEvent::new(kind.finished_event()).with_source(kind.name(), id.clone()));

                match self.find_parents(kind, &id).await {
                    Ok(parents) => {
                        for (parent_kind, parent_id) in parents {
                            self.next_logged(parent_kind, &parent_id).await;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(kind = %kind, id = %id, error = %e, "Parent lookup failed");
                    }
                }
            }
            PipelineEvent::Submitted { run_id, completion } => {
                let submission_id = completion.submission_id().to_string();
                self.on_completion(&run_id, &submission_id, completion.wait().await)
                    .await;
            }
        }
    }

    async fn on_completion(
        &self,
        run_id: &str,
        submission_id: &str,
        outcome: Result<(), CompletionError>,
    ) {
        match outcome {
            // A remote failure is confirmed and recorded by the status
            // check in `on_result`.
            Ok(()) | Err(CompletionError::Failed { .. }) => {
                if let Err(e) = self.run_advancer.on_result(submission_id).await {
                    tracing::warn!(
                        run_id,
                        submission_id,
                        error = %e,
                        "Completing submission failed",
                    );
                }
            }
            Err(CompletionError::Timeout { attempts, .. }) => {
                tracing::warn!(
                    run_id,
                    submission_id,
                    attempts,
                    "Submission completion timed out, leaving it to the sweep",
                );
            }
            Err(CompletionError::Shutdown) => {
                tracing::debug!(submission_id, "Completion wait ended by shutdown");
            }
        }
    }

    /// Dispatch events until `cancel` fires. Each event is handled in its
    /// own task.
    pub async fn run_dispatch(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<PipelineEvent>,
        cancel: CancellationToken,
    ) {
        tracing::info!("Pipeline dispatcher started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Pipeline dispatcher shutting down");
                    break;
                }
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let this = Arc::clone(&self);
                    self.tasks.spawn(async move { this.handle(event).await });
                }
            }
        }

        self.tasks.close();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.tasks.wait())
            .await
            .is_err()
        {
            tracing::warn!("Pipeline handlers did not finish within the shutdown grace period");
        }
    }
}
