//! In-process event bus for job lifecycle events.
//!
//! - [`EventBus`] fans out every published event through
//!   `tokio::sync::broadcast`.
//! - [`JobEvent`] is the event envelope.

pub mod bus;

pub use bus::{EventBus, JobEvent};
