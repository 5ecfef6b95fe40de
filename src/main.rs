use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use code_checker::app_state::AppState;
use code_checker::config::AppConfig;
use code_checker::db::{self, store::PgStore};
use code_checker::routes;
use code_checker::services::{
    executor::ChatCompletionsExecutor, gate::ConcurrencyGate, notifier::BroadcastNotifier,
    processor::RequestProcessor, queue::WorkQueue, reconciler, worker::WorkerPool,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing code-checker server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let store = Arc::new(PgStore::new(db_pool.clone()));
    let notifier = Arc::new(BroadcastNotifier::new(config.notification_buffer));

    // Nothing from a previous process is still running: fail its leftovers before
    // any worker can pick up new work.
    let report = reconciler::reconcile_interrupted(store.as_ref(), notifier.as_ref())
        .await
        .expect("Failed to reconcile interrupted requests");
    tracing::info!(
        found = report.found,
        failed = report.failed.len(),
        errors = report.errors.len(),
        "Startup reconciliation done"
    );

    let concurrency = config.analysis_concurrency();
    tracing::info!(concurrency, "Initializing analysis concurrency gate");
    let gate = Arc::new(ConcurrencyGate::new(concurrency));
    let queue = Arc::new(WorkQueue::new());

    let executor = Arc::new(ChatCompletionsExecutor::new(&config.data_dir));
    let processor = Arc::new(RequestProcessor::new(
        store.clone(),
        store.clone(),
        notifier.clone(),
        executor,
    ));
    let workers = WorkerPool::start(
        concurrency,
        Arc::clone(&queue),
        Arc::clone(&gate),
        processor,
    );

    // Create shared application state
    let state = AppState::new(db_pool, store, queue, gate, notifier);

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/ws", get(routes::ws::ws_handler))
        .route("/api/v1/requests", post(routes::requests::create_request))
        .route(
            "/api/v1/requests/{id}",
            get(routes::requests::get_request_status),
        )
        .route(
            "/api/v1/requests/{id}/regenerate",
            post(routes::requests::regenerate_request),
        )
        .route(
            "/api/v1/admin/requests/{id}/retry",
            post(routes::admin::retry_request),
        )
        .route(
            "/api/v1/admin/requests/batch-retry",
            post(routes::admin::batch_retry),
        )
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(2 * 1024 * 1024));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    let report = workers.shutdown(config.shutdown_drain_timeout()).await;
    tracing::info!(?report, "Shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, draining analysis queue");
}
