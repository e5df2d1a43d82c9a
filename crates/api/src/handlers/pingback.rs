//! Completion webhooks from the benchmark service.
//!
//! The service calls back once per finished submission. Handling is
//! detached from the request so the caller is never held up by result
//! fetching; both forms answer 202.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;

use crate::dto::{PingbackBody, PingbackQuery};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// POST /pingback `{ "submissionId": "..." }`
pub async fn post_pingback(
    State(state): State<AppState>,
    Json(body): Json<PingbackBody>,
) -> AppResult<StatusCode> {
    accept(state, body.submission_id)
}

/// GET /pingback?id=...
pub async fn get_pingback(
    State(state): State<AppState>,
    Query(query): Query<PingbackQuery>,
) -> AppResult<StatusCode> {
    accept(state, query.id)
}

fn accept(state: AppState, submission_id: String) -> AppResult<StatusCode> {
    let submission_id = submission_id.trim().to_string();
    if submission_id.is_empty() {
        return Err(AppError::BadRequest("submission id is required".into()));
    }

    tracing::info!(%submission_id, "Pingback received");
    tokio::spawn(async move {
        state.orchestrator.on_webhook(&submission_id).await;
    });
    Ok(StatusCode::ACCEPTED)
}
