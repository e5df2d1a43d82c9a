//! Client for the remote page-load benchmarking service.
//!
//! - [`BenchmarkService`] is the seam every caller goes through;
//!   [`BenchmarkApi`] implements it over HTTP and
//!   [`fake::ScriptedBenchmarkService`] implements it in memory.
//! - [`CompletionBroker`] turns a submission into a completion handle that
//!   settles on whichever arrives first: a webhook or a fallback poll.

pub mod api;
pub mod broker;
pub mod error;
pub mod fake;
pub mod messages;
pub mod service;

pub use api::BenchmarkApi;
pub use broker::{Completion, CompletionBroker, CompletionError, PollConfig};
pub use error::RemoteServiceError;
pub use messages::{SubmissionStatus, TestResult};
pub use service::{ArtifactKind, BenchmarkService, ResultOptions, SubmitRequest};
