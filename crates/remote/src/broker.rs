//! Dual-channel completion tracking for remote submissions.
//!
//! [`CompletionBroker::submit`] hands the caller a [`Completion`] for every
//! submission and starts a fallback poll loop for it. The handle settles
//! exactly once, on whichever producer fires first:
//!
//! - [`CompletionBroker::on_webhook`], called when the service's push
//!   notification arrives;
//! - the poll loop, on a terminal status or when its attempt budget runs
//!   out (timeout).
//!
//! The broker keeps only the settle side. Settling is a check-and-remove of
//! the sender under one mutex, so the second producer always finds nothing
//! to settle. A dropped [`Completion`] abandons the wait and its poll loop
//! removes the entry on its next tick.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::RemoteServiceError;
use crate::messages::SubmissionStatus;
use crate::service::{BenchmarkService, SubmitRequest};

/// Default delay between fallback status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(120);

/// Default number of fallback polls before giving up.
pub const DEFAULT_POLL_ATTEMPTS: u32 = 10;

/// How long [`CompletionBroker::shutdown`] waits for poll loops to exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Fallback poll schedule.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_POLL_ATTEMPTS,
        }
    }
}

/// Why a completion handle was rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompletionError {
    /// The service reported an error status for the submission.
    #[error("Submission {submission_id} failed remotely ({code}): {text}")]
    Failed {
        submission_id: String,
        code: u16,
        text: String,
    },

    /// The poll budget ran out without a terminal status.
    #[error("Submission {submission_id} still pending after {attempts} status polls")]
    Timeout {
        submission_id: String,
        attempts: u32,
    },

    #[error("Completion broker shut down")]
    Shutdown,
}

type Outcome = Result<(), CompletionError>;

/// Await side of one submission's completion handle.
#[must_use = "dropping a Completion abandons the wait"]
pub struct Completion {
    submission_id: String,
    receiver: oneshot::Receiver<Outcome>,
}

impl Completion {
    pub fn submission_id(&self) -> &str {
        &self.submission_id
    }

    /// Wait for the handle to settle.
    pub async fn wait(self) -> Outcome {
        self.receiver.await.unwrap_or(Err(CompletionError::Shutdown))
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("submission_id", &self.submission_id)
            .finish_non_exhaustive()
    }
}

/// Settle sides of unsettled handles, keyed by submission id. Cloned into
/// each poll loop.
#[derive(Clone, Default)]
struct Pending(Arc<Mutex<HashMap<String, oneshot::Sender<Outcome>>>>);

impl Pending {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Outcome>>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, submission_id: &str) -> Completion {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(submission_id.to_string(), tx);
        Completion {
            submission_id: submission_id.to_string(),
            receiver: rx,
        }
    }

    /// Whether someone still waits on the handle. Entries whose
    /// [`Completion`] was dropped are removed here.
    fn is_awaited(&self, submission_id: &str) -> bool {
        let mut table = self.lock();
        match table.get(submission_id) {
            Some(tx) if !tx.is_closed() => true,
            Some(_) => {
                table.remove(submission_id);
                false
            }
            None => false,
        }
    }

    /// Settle a handle. Returns `true` only if a live waiter received the
    /// outcome.
    fn settle(&self, submission_id: &str, outcome: Outcome) -> bool {
        let sender = self.lock().remove(submission_id);
        match sender {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    fn awaited_count(&self) -> usize {
        self.lock().values().filter(|tx| !tx.is_closed()).count()
    }
}

/// Tracks outstanding submissions and resolves their completion handles.
pub struct CompletionBroker {
    service: Arc<dyn BenchmarkService>,
    config: PollConfig,
    pending: Pending,
    /// Master token; each poll loop runs on a child of it.
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl CompletionBroker {
    pub fn new(service: Arc<dyn BenchmarkService>, config: PollConfig) -> Self {
        Self {
            service,
            config,
            pending: Pending::default(),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// The wrapped service, for calls that need no completion tracking.
    pub fn service(&self) -> &Arc<dyn BenchmarkService> {
        &self.service
    }

    /// Submit through the service, register a completion handle, and start
    /// the fallback poll loop. The handle is settleable before this returns.
    pub async fn submit(&self, request: &SubmitRequest) -> Result<Completion, RemoteServiceError> {
        let submission_id = self.service.submit(request).await?;
        Ok(self.track(&submission_id))
    }

    /// Register a handle and poll loop for an already-submitted id.
    pub fn track(&self, submission_id: &str) -> Completion {
        let completion = self.pending.register(submission_id);

        let service = Arc::clone(&self.service);
        let pending = self.pending.clone();
        let cancel = self.cancel.child_token();
        let config = self.config;
        let submission_id = submission_id.to_string();

        self.tasks.spawn(async move {
            poll_until_settled(service, pending, submission_id, config, cancel).await;
        });
        completion
    }

    /// Webhook producer. Returns `true` if this call delivered the outcome
    /// to a waiter, `false` otherwise (unknown id, the poll loop won, or the
    /// [`Completion`] was dropped).
    pub fn on_webhook(&self, submission_id: &str) -> bool {
        let settled = self.pending.settle(submission_id, Ok(()));
        tracing::debug!(submission_id, settled, "Webhook received");
        settled
    }

    /// Number of handles not yet settled that someone waits on.
    pub fn pending_count(&self) -> usize {
        self.pending.awaited_count()
    }

    /// Stop all poll loops and reject every unsettled handle.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down completion broker");
        self.cancel.cancel();
        self.tasks.close();

        let senders: Vec<_> = self.pending.lock().drain().collect();
        for (submission_id, tx) in senders {
            tracing::debug!(%submission_id, "Rejecting pending completion on shutdown");
            let _ = tx.send(Err(CompletionError::Shutdown));
        }

        if tokio::time::timeout(SHUTDOWN_GRACE, self.tasks.wait())
            .await
            .is_err()
        {
            tracing::warn!("Poll loops did not exit within the shutdown grace period");
        }
        tracing::info!("Completion broker shut down complete");
    }
}

/// Poll `status` on a fixed interval until the handle is settled or
/// abandoned, a terminal status is seen, the budget runs out, or `cancel`
/// fires.
async fn poll_until_settled(
    service: Arc<dyn BenchmarkService>,
    pending: Pending,
    submission_id: String,
    config: PollConfig,
    cancel: CancellationToken,
) {
    for attempt in 1..=config.max_attempts {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(config.interval) => {}
        }

        if !pending.is_awaited(&submission_id) {
            return;
        }

        match service.status(&submission_id).await {
            Ok(SubmissionStatus::Complete) => {
                if pending.settle(&submission_id, Ok(())) {
                    tracing::info!(%submission_id, attempt, "Submission completed (poll)");
                }
                return;
            }
            Ok(SubmissionStatus::Error { code, text }) => {
                tracing::warn!(%submission_id, code, %text, "Submission failed remotely");
                pending.settle(
                    &submission_id,
                    Err(CompletionError::Failed {
                        submission_id: submission_id.clone(),
                        code,
                        text,
                    }),
                );
                return;
            }
            Ok(status) => {
                tracing::trace!(%submission_id, attempt, ?status, "Submission still pending");
            }
            Err(e) => {
                tracing::warn!(
                    %submission_id,
                    attempt,
                    error = %e,
                    "Status poll failed",
                );
            }
        }
    }

    if pending.settle(
        &submission_id,
        Err(CompletionError::Timeout {
            submission_id: submission_id.clone(),
            attempts: config.max_attempts,
        }),
    ) {
        tracing::warn!(
            %submission_id,
            attempts = config.max_attempts,
            "Gave up polling submission",
        );
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pagebench_core::options::TestOptions;

    use super::*;
    use crate::fake::ScriptedBenchmarkService;

    fn request() -> SubmitRequest {
        SubmitRequest {
            url: "https://example.com".into(),
            script: "navigate https://example.com".into(),
            options: TestOptions::default(),
            label: "r:performance".into(),
        }
    }

    fn fast(max_attempts: u32) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(5),
            max_attempts,
        }
    }

    fn broker(config: PollConfig) -> (Arc<ScriptedBenchmarkService>, CompletionBroker) {
        let service = Arc::new(ScriptedBenchmarkService::new());
        let broker = CompletionBroker::new(service.clone(), config);
        (service, broker)
    }

    #[tokio::test]
    async fn webhook_settles_handle_once() {
        let (_, broker) = broker(PollConfig::default());
        let completion = broker.submit(&request()).await.unwrap();
        let id = completion.submission_id().to_string();

        assert!(broker.on_webhook(&id));
        assert!(!broker.on_webhook(&id));
        assert_eq!(completion.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn webhook_for_unknown_submission_is_a_no_op() {
        let (_, broker) = broker(PollConfig::default());
        assert!(!broker.on_webhook("never-submitted"));
    }

    #[tokio::test]
    async fn poll_times_out_after_budget() {
        let (service, broker) = broker(fast(10));
        let completion = broker.submit(&request()).await.unwrap();
        let id = completion.submission_id().to_string();

        let outcome = completion.wait().await;

        assert_matches!(outcome, Err(CompletionError::Timeout { attempts: 10, .. }));
        assert_eq!(service.status_calls(&id), 10);
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn poll_settles_without_webhook() {
        let (service, broker) = broker(fast(50));
        let completion = broker.submit(&request()).await.unwrap();
        let id = completion.submission_id().to_string();
        service.complete(&id);

        assert_eq!(completion.wait().await, Ok(()));
        assert!(!broker.on_webhook(&id));
    }

    #[tokio::test]
    async fn remote_error_rejects_handle() {
        let (service, broker) = broker(fast(50));
        let completion = broker.submit(&request()).await.unwrap();
        service.fail(completion.submission_id(), 404, "Test not found");

        let outcome = completion.wait().await;
        assert_matches!(outcome, Err(CompletionError::Failed { code: 404, .. }));
    }

    #[tokio::test]
    async fn poll_stops_after_webhook() {
        let (service, broker) = broker(fast(10));
        let completion = broker.submit(&request()).await.unwrap();
        let id = completion.submission_id().to_string();
        assert!(broker.on_webhook(&id));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(service.status_calls(&id) <= 1);
        assert_eq!(completion.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn dropped_completions_leave_no_entries() {
        let (service, broker) = broker(fast(2));
        let mut ids = Vec::new();
        for _ in 0..50 {
            let completion = broker.submit(&request()).await.unwrap();
            ids.push(completion.submission_id().to_string());
        }

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(broker.pending.lock().is_empty());
        assert_eq!(broker.pending_count(), 0);
        for id in &ids {
            assert!(service.status_calls(id) <= 1);
        }
    }

    #[tokio::test]
    async fn webhook_for_dropped_completion_reports_no_waiter() {
        let (_, broker) = broker(PollConfig::default());
        let completion = broker.submit(&request()).await.unwrap();
        let id = completion.submission_id().to_string();
        drop(completion);

        assert!(!broker.on_webhook(&id));
        assert!(broker.pending.lock().is_empty());
    }

    #[tokio::test]
    async fn shutdown_rejects_pending_handles() {
        let (_, broker) = broker(PollConfig::default());
        let completion = broker.submit(&request()).await.unwrap();

        broker.shutdown().await;

        assert_eq!(completion.wait().await, Err(CompletionError::Shutdown));
    }

    #[tokio::test]
    async fn submit_error_registers_nothing() {
        let (service, broker) = broker(PollConfig::default());
        service.fail_next_submits(1);

        assert!(broker.submit(&request()).await.is_err());
        assert_eq!(broker.pending_count(), 0);
    }
}
