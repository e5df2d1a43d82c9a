#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use pagebench_db::models::{Batch, Comparison, Run, Series};
use pagebench_db::{DocumentStore, Entity, MemoryStore, Repo};
use pagebench_events::EventBus;
use pagebench_pipeline::{Collaborators, Orchestrator, PipelineConfig};
use pagebench_remote::fake::ScriptedBenchmarkService;
use pagebench_remote::{CompletionBroker, PollConfig};
use tokio_util::sync::CancellationToken;

/// Poll schedule that never fires within a test.
pub fn idle_polling() -> PollConfig {
    PollConfig {
        interval: Duration::from_secs(600),
        max_attempts: 10,
    }
}

/// Poll schedule fast enough to settle handles without webhooks.
pub fn fast_polling() -> PollConfig {
    PollConfig {
        interval: Duration::from_millis(5),
        max_attempts: 200,
    }
}

/// A full engine over an in-memory store and a scripted service, with the
/// dispatch loop running.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub service: Arc<ScriptedBenchmarkService>,
    pub orchestrator: Arc<Orchestrator>,
    pub bus: Arc<EventBus>,
    cancel: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_polling(idle_polling())
    }

    pub fn with_polling(poll: PollConfig) -> Self {
        Self::build(
            Arc::new(MemoryStore::new()),
            Arc::new(ScriptedBenchmarkService::new()),
            poll,
            Collaborators::default(),
        )
    }

    pub fn with_collaborators(collaborators: Collaborators) -> Self {
        Self::build(
            Arc::new(MemoryStore::new()),
            Arc::new(ScriptedBenchmarkService::new()),
            idle_polling(),
            collaborators,
        )
    }

    /// A second engine over the same store and service, as after a
    /// process restart: no completion handles carry over.
    pub fn restarted(&self) -> Self {
        Self::build(
            Arc::clone(&self.store),
            Arc::clone(&self.service),
            idle_polling(),
            Collaborators::default(),
        )
    }

    fn build(
        store: Arc<MemoryStore>,
        service: Arc<ScriptedBenchmarkService>,
        poll: PollConfig,
        collaborators: Collaborators,
    ) -> Self {
        let broker = Arc::new(CompletionBroker::new(service.clone(), poll));
        let bus = Arc::new(EventBus::default());
        let dyn_store: Arc<dyn DocumentStore> = store.clone();
        let (orchestrator, events) = Orchestrator::new(
            dyn_store,
            broker,
            Arc::clone(&bus),
            collaborators,
            PipelineConfig::default(),
        );

        let cancel = CancellationToken::new();
        tokio::spawn(Arc::clone(&orchestrator).run_dispatch(events, cancel.clone()));

        Self {
            store,
            service,
            orchestrator,
            bus,
            cancel,
        }
    }

    pub fn repo<T: Entity>(&self) -> Repo<T> {
        let store: Arc<dyn DocumentStore> = self.store.clone();
        Repo::new(store)
    }

    pub fn runs(&self) -> Repo<Run> {
        self.repo()
    }

    pub fn comparisons(&self) -> Repo<Comparison> {
        self.repo()
    }

    pub fn series(&self) -> Repo<Series> {
        self.repo()
    }

    pub fn batches(&self) -> Repo<Batch> {
        self.repo()
    }

    /// Complete every running submission and deliver its webhook.
    pub async fn deliver_webhooks(&self) -> usize {
        let completed = self.service.complete_outstanding();
        for submission_id in &completed {
            self.orchestrator.on_webhook(submission_id).await;
        }
        completed.len()
    }

    /// Deliver webhooks round after round until the record finishes.
    pub async fn drive_to_finish<T: Entity>(&self, id: &str) -> T {
        let repo = self.repo::<T>();
        for _ in 0..400 {
            let record = repo.load(id).await.unwrap().entity;
            if record.is_finished() {
                return record;
            }
            self.deliver_webhooks().await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{} {id} did not finish", T::KIND);
    }

    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.orchestrator.broker().shutdown().await;
    }
}

/// Wait until `check` holds, failing the test after two seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}
