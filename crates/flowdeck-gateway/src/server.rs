//! HTTP server implementation using Axum.

use axum::{
    Router,
    routing::{get, post, put},
};
use flowdeck_core::config::FlowdeckConfig;
use flowdeck_scheduler::{
    Clock, SchedulerBootstrap, SystemClock, WorkflowService, executor, open_store,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub config: FlowdeckConfig,
    /// Workflow CRUD; also owns the save trigger for the scheduler.
    pub service: WorkflowService,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: FlowdeckConfig, service: WorkflowService) -> Self {
        Self {
            config,
            service,
            start_time: std::time::Instant::now(),
        }
    }

    /// Wire store, executor and scheduler bootstrap from config.
    pub fn from_config(config: FlowdeckConfig) -> flowdeck_core::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = open_store(&config.store, clock.clone())?;
        let executor = executor::from_endpoint(
            config.executor.endpoint.as_deref(),
            config.executor.timeout_secs,
        );
        tracing::info!("🚀 Workflow executor: {}", executor.name());
        let bootstrap = Arc::new(SchedulerBootstrap::from_parts(
            store.clone(),
            executor,
            clock,
            config.scheduler.clone(),
        ));
        let service = WorkflowService::new(store, bootstrap);
        Ok(Self::new(config, service))
    }

    pub fn bootstrap(&self) -> &Arc<SchedulerBootstrap> {
        self.service.bootstrap()
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    build_router_from_arc(Arc::new(state))
}

pub fn build_router_from_arc(shared: Arc<AppState>) -> Router {
    let cors_enabled = shared.config.gateway.cors;

    let router = Router::new()
        .route("/health", get(super::routes::health_check))
        .route("/api/workflows/save", post(super::routes::save_workflow))
        .route("/api/workflows/list", get(super::routes::list_workflows))
        .route("/api/workflows/load", get(super::routes::load_workflow))
        .route(
            "/api/workflows/{id}",
            put(super::routes::update_workflow).delete(super::routes::delete_workflow),
        )
        // Scheduler API
        .route(
            "/api/workflows/scheduler/init",
            get(super::routes::scheduler_init),
        )
        .route(
            "/api/workflows/scheduler/status",
            get(super::routes::scheduler_status),
        )
        .route(
            "/api/workflows/scheduler/stop",
            post(super::routes::scheduler_stop),
        );

    let router = if cors_enabled {
        router.layer({
            let cors = CorsLayer::new()
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PUT,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(Any)
                .max_age(std::time::Duration::from_secs(3600));

            // Example: FLOWDECK_CORS_ORIGINS=https://lab.example.com,https://ops.example.com
            if let Ok(origins_str) = std::env::var("FLOWDECK_CORS_ORIGINS") {
                let origins: Vec<_> = origins_str
                    .split(',')
                    .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
                    .collect();
                cors.allow_origin(origins)
            } else {
                cors.allow_origin(Any)
            }
        })
    } else {
        router
    };

    router.layer(TraceLayer::new_for_http()).with_state(shared)
}

/// Start the HTTP server.
pub async fn start(state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.gateway.host, state.config.gateway.port);

    if state.config.scheduler.autostart {
        state.bootstrap().ensure_started();
    } else {
        tracing::info!("⏸️ Scheduler autostart disabled, waiting for init or a scheduled save");
    }

    let bootstrap = state.bootstrap().clone();
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Gateway server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(scheduler) = bootstrap.existing() {
        scheduler.stop();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("⚠️ Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("👋 Shutting down gateway");
}
