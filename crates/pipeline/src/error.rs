use std::time::Duration;

use pagebench_core::error::CoreError;
use pagebench_db::StoreError;
use pagebench_remote::RemoteServiceError;

/// Errors from advancing a record.
///
/// Entry points driven by webhooks, the sweep, and the dispatcher log and
/// swallow these; only creation calls surface them to callers.
#[derive(Debug, thiserror::Error)]
pub enum AdvanceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Remote(#[from] RemoteServiceError),

    #[error(transparent)]
    Validation(#[from] CoreError),

    /// Persisted state contradicts itself (e.g. a reserved child slot with
    /// no matching request).
    #[error("Inconsistent {kind} {id}: {reason}")]
    Inconsistent {
        kind: &'static str,
        id: String,
        reason: String,
    },
}

/// An unfinished record that has not changed for longer than the sweep's
/// short window.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} {id} idle for {}s", idle.as_secs())]
pub struct StaleRecordError {
    pub kind: &'static str,
    pub id: String,
    pub idle: Duration,
    /// Sweep retries already counted (runs only).
    pub retry_count: u32,
}
