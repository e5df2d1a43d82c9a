//! Shared domain types and pure logic for pagebench.
//!
//! Nothing in this crate performs I/O: it holds identifiers, metric and
//! factor math, test options, the stage plan, and small in-process
//! utilities (TTL cache) that the store, remote client, and pipeline
//! crates build on.

pub mod cache;
pub mod error;
pub mod factors;
pub mod ids;
pub mod job_events;
pub mod metrics;
pub mod options;
pub mod types;
