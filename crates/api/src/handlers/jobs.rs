//! Handlers for the job hierarchy: batches, series, comparisons, runs.
//!
//! Creation hands the validated request to the [`Orchestrator`], which
//! persists the record and starts it before the response is sent. Reads
//! return the stored record as-is.
//!
//! [`Orchestrator`]: pagebench_pipeline::Orchestrator

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use pagebench_db::models::{Batch, Comparison, Run, Series};
use pagebench_db::{DocumentStore, Entity, Repo};
use validator::Validate;

use crate::dto::{CreateBatch, CreateComparison, CreateSeries};
use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn load_record<T: Entity>(store: &Arc<dyn DocumentStore>, id: &str) -> AppResult<T> {
    let record = Repo::<T>::new(Arc::clone(store)).load(id).await?;
    Ok(record.entity)
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// POST /api/v1/batches
///
/// Queue one series per spec. Returns 201 with the batch, whose first
/// series has already been started.
pub async fn create_batch(
    State(state): State<AppState>,
    Json(input): Json<CreateBatch>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    let defaults = state.config.default_options();
    let specs = input
        .specs
        .into_iter()
        .map(|spec| spec.into_spec(&defaults))
        .collect();

    let batch = state.orchestrator.create_batch(specs).await?;
    tracing::info!(
        batch_id = %batch.id,
        series = batch.requested.len(),
        "Batch submitted",
    );

    Ok((StatusCode::CREATED, Json(DataResponse { data: batch })))
}

/// POST /api/v1/series
pub async fn create_series(
    State(state): State<AppState>,
    Json(input): Json<CreateSeries>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    let spec = input.into_spec(&state.config.default_options());

    let series = state
        .orchestrator
        .create_series(spec.url, spec.repetitions, spec.options)
        .await?;
    tracing::info!(series_id = %series.id, url = %series.url, "Series submitted");

    Ok((StatusCode::CREATED, Json(DataResponse { data: series })))
}

/// POST /api/v1/comparisons
///
/// Single-URL mode: one baseline/variant pair outside any series.
pub async fn create_comparison(
    State(state): State<AppState>,
    Json(input): Json<CreateComparison>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    let options = input
        .options
        .unwrap_or_else(|| state.config.default_options());

    let comparison = state
        .orchestrator
        .create_comparison(input.url, options)
        .await?;
    tracing::info!(comparison_id = %comparison.id, "Comparison submitted");

    Ok((StatusCode::CREATED, Json(DataResponse { data: comparison })))
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// GET /api/v1/batches/{id}
pub async fn get_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DataResponse<Batch>>> {
    let data = load_record(&state.store, &id).await?;
    Ok(Json(DataResponse { data }))
}

/// GET /api/v1/series/{id}
pub async fn get_series(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DataResponse<Series>>> {
    let data = load_record(&state.store, &id).await?;
    Ok(Json(DataResponse { data }))
}

/// GET /api/v1/comparisons/{id}
pub async fn get_comparison(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DataResponse<Comparison>>> {
    let data = load_record(&state.store, &id).await?;
    Ok(Json(DataResponse { data }))
}

/// GET /api/v1/runs/{id}
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DataResponse<Run>>> {
    let data = load_record(&state.store, &id).await?;
    Ok(Json(DataResponse { data }))
}
