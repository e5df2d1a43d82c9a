use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pagebench_core::error::CoreError;
use pagebench_db::StoreError;
use pagebench_pipeline::AdvanceError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps domain and persistence errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Creating or advancing a record failed.
    #[error(transparent)]
    Advance(#[from] AdvanceError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Core(CoreError::Validation(errors.to_string()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core_error(core),
            AppError::Store(err) => classify_store_error(err),
            AppError::Advance(err) => match err {
                AdvanceError::Validation(core) => classify_core_error(core),
                AdvanceError::Store(store) => classify_store_error(store),
                other => internal(other),
            },
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => internal(msg),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn classify_core_error(err: &CoreError) -> (StatusCode, &'static str, String) {
    match err {
        CoreError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} with id {id} not found"),
        ),
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
        CoreError::Internal(msg) => internal(msg),
    }
}

/// Classify a store error into an HTTP status, error code, and message.
///
/// - `NotFound` maps to 404.
/// - Duplicate ids and exhausted compare-and-swap retries map to 409.
/// - Everything else maps to 500 with a sanitized message.
fn classify_store_error(err: &StoreError) -> (StatusCode, &'static str, String) {
    match err {
        StoreError::NotFound { kind, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{kind} with id {id} not found"),
        ),
        StoreError::AlreadyExists { .. } | StoreError::Contended { .. } => {
            (StatusCode::CONFLICT, "CONFLICT", err.to_string())
        }
        other => internal(other),
    }
}

fn internal(err: &dyn std::fmt::Display) -> (StatusCode, &'static str, String) {
    tracing::error!(error = %err, "Internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}
