use axum::routing::get;
use axum::Router;

use crate::handlers::pingback;
use crate::state::AppState;

/// Webhook route, mounted at the root so the service can reach it with a
/// short callback URL.
///
/// ```text
/// GET    /pingback?id=   -> get_pingback
/// POST   /pingback       -> post_pingback
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/pingback",
        get(pingback::get_pingback).post(pingback::post_pingback),
    )
}
