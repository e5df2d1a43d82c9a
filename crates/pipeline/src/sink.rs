//! Upward notifications from advancers.
//!
//! An advancer never calls its parent. It emits a [`PipelineEvent`] into
//! the [`EventSink`] it was built with, and the
//! [`Orchestrator`](crate::Orchestrator) decides who reacts.

use pagebench_core::job_events::{
    EVENT_BATCH_FINISHED, EVENT_COMPARISON_FINISHED, EVENT_RUN_FINISHED, EVENT_SERIES_FINISHED,
};
use pagebench_core::types::EntityId;
use pagebench_db::models::{Batch, Comparison, Run, Series};
use pagebench_db::Entity;
use pagebench_remote::Completion;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// The four record kinds of the job hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Run,
    Comparison,
    Series,
    Batch,
}

impl RecordKind {
    /// Document kind in the store.
    pub fn name(self) -> &'static str {
        match self {
            Self::Run => Run::KIND,
            Self::Comparison => Comparison::KIND,
            Self::Series => Series::KIND,
            Self::Batch => Batch::KIND,
        }
    }

    /// Event type published on the bus when a record of this kind finishes.
    pub fn finished_event(self) -> &'static str {
        match self {
            Self::Run => EVENT_RUN_FINISHED,
            Self::Comparison => EVENT_COMPARISON_FINISHED,
            Self::Series => EVENT_SERIES_FINISHED,
            Self::Batch => EVENT_BATCH_FINISHED,
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug)]
pub enum PipelineEvent {
    /// The emitting call flipped the record's `finished` flag.
    Finished { kind: RecordKind, id: EntityId },
    /// A stage submission went out; whoever handles this owns its
    /// completion handle.
    Submitted {
        run_id: EntityId,
        completion: Completion,
    },
}

/// Sending half of the pipeline event channel.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: PipelineEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::warn!(event = ?e.0, "Pipeline event dropped, dispatcher stopped");
        }
    }

    pub fn finished(&self, kind: RecordKind, id: impl Into<EntityId>) {
        let id = id.into();
        tracing::info!(kind = %kind, id = %id, "Record finished");
        self.emit(PipelineEvent::Finished { kind, id });
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn kinds_match_store_kinds() {
        assert_eq!(RecordKind::Run.name(), "run");
        assert_eq!(RecordKind::Batch.name(), "batch");
        assert_eq!(RecordKind::Series.finished_event(), "series.finished");
    }

    #[tokio::test]
    async fn finished_events_reach_the_receiver() {
        let (sink, mut rx) = EventSink::channel();
        sink.finished(RecordKind::Comparison, "c1");

        assert_matches!(
            rx.recv().await,
            Some(PipelineEvent::Finished {
                kind: RecordKind::Comparison,
                id,
            }) if id == "c1"
        );
    }

    #[test]
    fn emitting_after_receiver_dropped_does_not_panic() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.finished(RecordKind::Run, "r1");
    }
}
