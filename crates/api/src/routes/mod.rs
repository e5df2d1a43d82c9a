pub mod health;
pub mod jobs;
pub mod pingback;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /batches                 create
/// /batches/{id}            get
/// /series                  create
/// /series/{id}             get
/// /comparisons             create (single-URL mode)
/// /comparisons/{id}        get
/// /runs/{id}               get
/// ```
pub fn api_routes() -> Router<AppState> {
    jobs::router()
}
