//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`JobEvent`]s. Share it
//! via `Arc<EventBus>`.

use chrono::{DateTime, Utc};
use pagebench_core::types::EntityId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// Something that happened to a record of the job hierarchy.
///
/// Constructed via [`JobEvent::new`] and enriched with
/// [`with_source`](JobEvent::with_source) and
/// [`with_payload`](JobEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    /// Dot-separated event name, e.g. `"run.finished"`.
    pub event_type: String,

    /// Source record kind (`"run"`, `"comparison"`, ...).
    pub source_kind: Option<String>,

    pub source_id: Option<EntityId>,

    /// Event-specific data.
    pub payload: serde_json::Value,

    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            source_kind: None,
            source_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    /// Attach the record the event is about.
    pub fn with_source(mut self, kind: impl Into<String>, id: impl Into<EntityId>) -> Self {
        self.source_kind = Some(kind.into());
        self.source_id = Some(id.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use pagebench_events::bus::{EventBus, JobEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(JobEvent::new("run.finished"));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest messages are dropped and slow
    /// receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Dropped if there are none.
    pub fn publish(&self, event: JobEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("Event published with no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
