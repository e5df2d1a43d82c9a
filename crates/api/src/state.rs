use std::sync::Arc;

use pagebench_db::DocumentStore;
use pagebench_pipeline::Orchestrator;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: everything is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Record store (memory or PostgreSQL).
    pub store: Arc<dyn DocumentStore>,
    /// The job-advancement engine.
    pub orchestrator: Arc<Orchestrator>,
    pub config: Arc<ServerConfig>,
}
