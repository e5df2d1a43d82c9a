use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use pagebench_db::{DocumentStore, MemoryStore, PgStore};
use pagebench_events::EventBus;
use pagebench_pipeline::{Collaborators, Orchestrator};
use pagebench_remote::{BenchmarkApi, CompletionBroker};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pagebench_api::config::ServerConfig;
use pagebench_api::router::build_app_router;
use pagebench_api::state::AppState;
use pagebench_api::background;

/// How long each background task gets to stop after shutdown starts.
const TASK_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "pagebench_api=debug,pagebench_pipeline=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().context("Invalid configuration")?;
    tracing::info!(host = %config.host, port = config.port, "Loaded server configuration");

    // --- Store ---
    let store = open_store(&config).await?;

    // --- Benchmark service ---
    let mut api = BenchmarkApi::new(
        config.benchmark_api_url.clone(),
        config.benchmark_api_key.clone(),
    );
    match &config.pingback_url {
        Some(url) => api = api.with_pingback(url.clone()),
        None => tracing::warn!("PINGBACK_URL not set, completions rely on fallback polling"),
    }
    let broker = Arc::new(CompletionBroker::new(Arc::new(api), config.poll_config()));
    tracing::info!(base_url = %config.benchmark_api_url, "Benchmark service client created");

    // --- Engine ---
    let event_bus = Arc::new(EventBus::default());
    let (orchestrator, events) = Orchestrator::new(
        Arc::clone(&store),
        Arc::clone(&broker),
        Arc::clone(&event_bus),
        Collaborators::default(),
        config.pipeline_config(),
    );

    let cancel = CancellationToken::new();
    let dispatch_handle = tokio::spawn(
        Arc::clone(&orchestrator).run_dispatch(events, cancel.clone()),
    );
    let sweep_handle = tokio::spawn(background::stale_sweep::run(
        Arc::clone(&orchestrator),
        config.sweep_config(),
        config.sweep_interval(),
        cancel.clone(),
    ));
    tracing::info!("Pipeline services started (dispatcher, stale sweep)");

    // --- App state ---
    let addr = SocketAddr::new(
        config.host.parse().context("Invalid HOST address")?,
        config.port,
    );
    let state = AppState {
        store,
        orchestrator,
        config: Arc::new(config),
    };
    let app = build_app_router(state);

    // --- Start server ---
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    cancel.cancel();
    if tokio::time::timeout(TASK_SHUTDOWN_GRACE, sweep_handle).await.is_err() {
        tracing::warn!("Stale sweep did not stop in time");
    }
    if tokio::time::timeout(TASK_SHUTDOWN_GRACE, dispatch_handle).await.is_err() {
        tracing::warn!("Pipeline dispatcher did not stop in time");
    }

    let pending = broker.pending_count();
    tracing::info!(pending, "Rejecting outstanding completion handles");
    broker.shutdown().await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// PostgreSQL when `DATABASE_URL` is set, otherwise an in-memory store.
async fn open_store(config: &ServerConfig) -> anyhow::Result<Arc<dyn DocumentStore>> {
    let Some(database_url) = &config.database_url else {
        tracing::warn!("DATABASE_URL not set, records are kept in memory only");
        return Ok(Arc::new(MemoryStore::new()));
    };

    let pool = pagebench_db::create_pool(database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    pagebench_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    pagebench_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(Arc::new(PgStore::new(pool)))
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM (on Unix) to initiate graceful
/// shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
