#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use pagebench_api::config::ServerConfig;
use pagebench_api::router::build_app_router;
use pagebench_api::state::AppState;
use pagebench_db::{DocumentStore, MemoryStore};
use pagebench_events::EventBus;
use pagebench_pipeline::{Collaborators, Orchestrator};
use pagebench_remote::fake::ScriptedBenchmarkService;
use pagebench_remote::{CompletionBroker, PollConfig};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..ServerConfig::default()
    }
}

/// The application over an in-memory store and a scripted benchmark
/// service, with the pipeline dispatcher running.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub service: Arc<ScriptedBenchmarkService>,
    pub orchestrator: Arc<Orchestrator>,
    cancel: CancellationToken,
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let service = Arc::new(ScriptedBenchmarkService::new());
        // Polling never fires within a test; completions come via /pingback.
        let broker = Arc::new(CompletionBroker::new(
            service.clone(),
            PollConfig {
                interval: Duration::from_secs(600),
                max_attempts: 10,
            },
        ));
        let dyn_store: Arc<dyn DocumentStore> = store.clone();
        let (orchestrator, events) = Orchestrator::new(
            Arc::clone(&dyn_store),
            broker,
            Arc::new(EventBus::default()),
            Collaborators::default(),
            Default::default(),
        );
        let cancel = CancellationToken::new();
        tokio::spawn(Arc::clone(&orchestrator).run_dispatch(events, cancel.clone()));

        let state = AppState {
            store: dyn_store,
            orchestrator: Arc::clone(&orchestrator),
            config: Arc::new(test_config()),
        };

        Self {
            router: build_app_router(state),
            store,
            service,
            orchestrator,
            cancel,
        }
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        send(self.router.clone(), Method::GET, uri, Body::empty()).await
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> Response<Body> {
        send(
            self.router.clone(),
            Method::POST,
            uri,
            Body::from(body.to_string()),
        )
        .await
    }

    /// Complete every running submission through `POST /pingback`.
    pub async fn pingback_all(&self) -> usize {
        let completed = self.service.complete_outstanding();
        for submission_id in &completed {
            self.post_json(
                "/pingback",
                serde_json::json!({ "submissionId": submission_id }),
            )
            .await;
        }
        completed.len()
    }

    /// Deliver pingbacks until `GET uri` reports a finished record.
    pub async fn drive_until_finished(&self, uri: &str) -> serde_json::Value {
        for _ in 0..400 {
            let json = body_json(self.get(uri).await).await;
            if json["data"]["finished"] == true {
                return json["data"].clone();
            }
            self.pingback_all().await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{uri} did not finish");
    }

    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.orchestrator.broker().shutdown().await;
    }
}

async fn send(router: Router, method: Method, uri: &str, body: Body) -> Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    router.oneshot(request).await.unwrap()
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
