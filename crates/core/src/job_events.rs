//! Event type names published on the event bus when a record finishes.
//!
//! The pipeline's event sink maps each finished record kind to one of these
//! names before the orchestrator publishes it.

/// A benchmark run reached its terminal state.
pub const EVENT_RUN_FINISHED: &str = "run.finished";

/// A baseline/variant comparison computed its factors.
pub const EVENT_COMPARISON_FINISHED: &str = "comparison.finished";

/// A repeated series aggregated its factors.
pub const EVENT_SERIES_FINISHED: &str = "series.finished";

/// Every requested URL in a batch has a finished series.
pub const EVENT_BATCH_FINISHED: &str = "batch.finished";
