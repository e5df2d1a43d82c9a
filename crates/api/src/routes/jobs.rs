//! Route definitions for the job hierarchy.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/batches", post(jobs::create_batch))
        .route("/batches/{id}", get(jobs::get_batch))
        .route("/series", post(jobs::create_series))
        .route("/series/{id}", get(jobs::get_series))
        .route("/comparisons", post(jobs::create_comparison))
        .route("/comparisons/{id}", get(jobs::get_comparison))
        .route("/runs/{id}", get(jobs::get_run))
}
