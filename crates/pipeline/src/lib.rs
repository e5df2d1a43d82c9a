//! The job-advancement engine.
//!
//! Four advancers, one per level of the job hierarchy, each answer "given
//! the persisted state of this record, what is the next action?":
//!
//! - [`RunAdvancer`]: staged remote submissions of one benchmark run.
//! - [`ComparisonAdvancer`]: a baseline/variant run pair and its factors.
//! - [`SeriesAdvancer`]: repeated comparisons of one URL.
//! - [`BatchAdvancer`]: a queue of series, one per requested URL.
//!
//! Advancers only reference their children. Completion flows upward as
//! [`PipelineEvent`]s through an injected [`EventSink`]; the
//! [`Orchestrator`] dispatches them to the owning parent, found by reverse
//! lookup in the store. Every transition is a compare-and-swap write, so
//! any `next` may run concurrently with another for the same record.

pub mod batch;
pub mod collaborators;
pub mod comparison;
pub mod error;
pub mod orchestrator;
pub mod run;
pub mod series;
pub mod sink;
pub mod sweep;

use std::time::Duration;

pub use batch::BatchAdvancer;
pub use collaborators::Collaborators;
pub use comparison::ComparisonAdvancer;
pub use error::{AdvanceError, StaleRecordError};
pub use orchestrator::Orchestrator;
pub use run::RunAdvancer;
pub use series::SeriesAdvancer;
pub use sink::{EventSink, PipelineEvent, RecordKind};
pub use sweep::{SweepConfig, SweepReport};

/// Default timeout for best-effort side calls (artifacts, insights).
pub const DEFAULT_AUX_TIMEOUT: Duration = Duration::from_secs(10);

/// Default age after which an unsubmitted stage claim is released.
pub const DEFAULT_CLAIM_TIMEOUT: Duration = Duration::from_secs(300);

/// Tunables shared by the advancers.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Upper bound on best-effort side calls.
    pub aux_timeout: Duration,
    /// A stage claimed this long ago without a submission id is released.
    pub claim_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            aux_timeout: DEFAULT_AUX_TIMEOUT,
            claim_timeout: DEFAULT_CLAIM_TIMEOUT,
        }
    }
}

/// The instant `age` before now, clamped to the earliest representable
/// time.
pub(crate) fn ago(age: Duration) -> pagebench_core::types::Timestamp {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| chrono::Utc::now().checked_sub_signed(age))
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC)
}
