/// Server setup and initialization
///
/// Wires together all components: local and remote stores, the storage
/// coordinator, session store, documentation cache, reconciliation scheduler
/// and HTTP routes.

use crate::{
    api::{create_cache_routes, create_session_routes, create_sync_routes, AppState},
    config::Config,
    service::ContextService,
    storage::reconcile::ReconcileScheduler,
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

/// Fully wired application
pub struct Application {
    pub router: Router,
    pub service: Arc<ContextService>,
    pub scheduler: Arc<ReconcileScheduler>,
}

/// Build the HTTP router over an existing service
pub fn build_router(service: Arc<ContextService>) -> Router {
    let app_state = AppState { service };

    Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        .merge(create_session_routes().with_state(app_state.clone()))
        .merge(create_cache_routes().with_state(app_state.clone()))
        .merge(create_sync_routes().with_state(app_state))
        .layer(TraceLayer::new_for_http())
}

/// Create the application with all routes and background jobs
pub async fn create_app(config: Config) -> Result<Application> {
    tracing::info!("🏗️ Initializing context service");
    let service = Arc::new(
        ContextService::open(&config)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize context service: {}", e))?,
    );

    tracing::info!("⏰ Initializing reconciliation scheduler");
    let scheduler = Arc::new(
        ReconcileScheduler::new(service.storage(), service.shutdown_token())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize reconciliation scheduler: {}", e))?,
    );
    scheduler.start(&config.storage.reconcile_schedule).await?;

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let router = build_router(Arc::clone(&service));

    tracing::info!("✅ Application initialized successfully");
    Ok(Application {
        router,
        service,
        scheduler,
    })
}

/// Start the HTTP server with the given configuration
///
/// Serves until Ctrl-C, then stops the scheduler and cancels in-flight
/// background work.
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting flowkeep server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app.scheduler.stop().await?;
    app.service.shutdown();
    tracing::info!("👋 Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("🛑 Shutdown signal received");
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
