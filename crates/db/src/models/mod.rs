//! Persisted records of the job hierarchy.
//!
//! Each submodule holds one [`Entity`](crate::Entity) plus the pure helpers
//! the advancers use to decide the next action from its state.

pub mod batch;
pub mod comparison;
pub mod run;
pub mod series;

pub use batch::{Batch, SeriesSpec};
pub use comparison::Comparison;
pub use run::{Run, RunPhase, Stage};
pub use series::Series;
