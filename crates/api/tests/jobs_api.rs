//! Integration tests for the job endpoints and the pingback webhook.

mod common;

use axum::http::StatusCode;
use common::{body_json, TestApp};
use serde_json::json;

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_comparison_starts_both_runs() {
    let app = TestApp::new();
    let response = app
        .post_json("/api/v1/comparisons", json!({"url": "https://example.com"}))
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    let id = json["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(id.len(), 12);
    assert_eq!(json["data"]["finished"], false);
    assert_eq!(json["data"]["runs"], json!([format!("{id}-base"), format!("{id}-accel")]));
    assert_eq!(app.service.submission_count(), 2);
    app.shutdown().await;
}

#[tokio::test]
async fn create_series_applies_default_options() {
    let app = TestApp::new();
    let response = app
        .post_json(
            "/api/v1/series",
            json!({"url": "https://example.com", "repetitions": 2}),
        )
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["data"]["repetitions"], 2);
    assert_eq!(json["data"]["options"]["location"], "Dulles:Chrome");
    assert_eq!(json["data"]["comparisons"].as_array().unwrap().len(), 1);
    app.shutdown().await;
}

#[tokio::test]
async fn batch_runs_to_completion_through_pingbacks() {
    let app = TestApp::new();
    let response = app
        .post_json(
            "/api/v1/batches",
            json!({"specs": [
                {"url": "https://a.example", "repetitions": 1},
                {"url": "https://b.example", "repetitions": 1,
                 "options": {"location": "London:Firefox", "mobile": true}},
            ]}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = body_json(response).await["data"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let batch = app
        .drive_until_finished(&format!("/api/v1/batches/{id}"))
        .await;

    let series = batch["series"].as_array().unwrap();
    assert_eq!(series.len(), 2);
    let second = body_json(
        app.get(&format!("/api/v1/series/{}", series[1].as_str().unwrap()))
            .await,
    )
    .await;
    assert_eq!(second["data"]["url"], "https://b.example");
    assert_eq!(second["data"]["options"]["location"], "London:Firefox");
    assert_eq!(second["data"]["finished"], true);
    app.shutdown().await;
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_series_is_rejected_with_400() {
    let app = TestApp::new();
    let response = app
        .post_json("/api/v1/series", json!({"url": "not a url", "repetitions": 0}))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert_eq!(app.service.submission_count(), 0);
    app.shutdown().await;
}

#[tokio::test]
async fn empty_batch_is_rejected_with_400() {
    let app = TestApp::new();
    let response = app.post_json("/api/v1/batches", json!({"specs": []})).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
    app.shutdown().await;
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_record_returns_404() {
    let app = TestApp::new();
    let response = app.get("/api/v1/runs/doesnotexist").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["code"], "NOT_FOUND");
    assert_eq!(json["error"], "run with id doesnotexist not found");
    app.shutdown().await;
}

#[tokio::test]
async fn finished_run_reports_metrics() {
    let app = TestApp::new();
    let response = app
        .post_json("/api/v1/comparisons", json!({"url": "https://example.com"}))
        .await;
    let id = body_json(response).await["data"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    app.drive_until_finished(&format!("/api/v1/comparisons/{id}"))
        .await;

    let run = body_json(app.get(&format!("/api/v1/runs/{id}-base")).await).await;
    assert_eq!(run["data"]["finished"], true);
    assert_eq!(run["data"]["data_missing"], false);
    assert_eq!(run["data"]["metrics"]["load_time"], 1500.0);
    app.shutdown().await;
}

// ---------------------------------------------------------------------------
// Pingback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pingback_forms_are_accepted() {
    let app = TestApp::new();

    let post = app
        .post_json("/pingback", json!({"submissionId": "unknown"}))
        .await;
    assert_eq!(post.status(), StatusCode::ACCEPTED);

    let get = app.get("/pingback?id=unknown").await;
    assert_eq!(get.status(), StatusCode::ACCEPTED);
    app.shutdown().await;
}

#[tokio::test]
async fn pingback_without_id_is_rejected() {
    let app = TestApp::new();

    let response = app.post_json("/pingback", json!({"submissionId": " "})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.get("/pingback").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    app.shutdown().await;
}
