pub mod extractors;
pub mod handlers;
pub mod middleware;

use crate::{knowledge, utils::error::VisionError, Config, ModelRegistry, ResultAssembler, Result};
use axum::{
    extract::{DefaultBodyLimit, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub assembler: ResultAssembler,
}

impl AppState {
    pub fn new(config: Config, assembler: ResultAssembler) -> Self {
        Self {
            config: Arc::new(config),
            assembler,
        }
    }
}

pub async fn serve(config: Config) -> Result<()> {
    let registry = Arc::new(ModelRegistry::load(&config));
    let lookup = knowledge::from_config(&config.knowledge_config)?;
    let assembler = ResultAssembler::new(Arc::clone(&registry), lookup)
        .with_enrichment_timeout(config.knowledge_config.timeout);

    let addr: SocketAddr = config.bind_addr.parse().map_err(|e| {
        VisionError::Config(format!("Invalid bind address {}: {}", config.bind_addr, e))
    })?;

    let app = create_app(AppState::new(config, assembler));

    tracing::info!("Server starting on http://{}", addr);
    tracing::info!("API endpoints:");
    tracing::info!("  POST /api/upload - Multipart image upload");
    tracing::info!("  POST /api/infer  - JSON base64 upload");
    tracing::info!("  GET  /api/models - Loaded models");
    tracing::info!("  GET  /health     - Health check");

    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        VisionError::Internal(format!("Failed to bind to address {}: {}", addr, e))
    })?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| VisionError::Internal(format!("Server failed: {}", e)))?;

    match Arc::try_unwrap(registry) {
        Ok(registry) => registry.shutdown(),
        Err(_) => tracing::warn!("Model registry still in use at shutdown"),
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

pub fn create_app(state: AppState) -> Router {
    let server_config = state.config.server_config.clone();

    Router::new()
        .route("/api/upload", post(handlers::upload_handler))
        .route("/api/infer", post(handlers::infer_json_handler))
        .route("/api/models", get(models_handler))
        .route("/health", get(health_handler))
        .layer(axum::middleware::from_fn(middleware::request_logging))
        .layer(DefaultBodyLimit::max(server_config.max_request_size))
        .layer(RequestBodyLimitLayer::new(server_config.max_request_size))
        .layer(TimeoutLayer::new(Duration::from_secs(server_config.request_timeout)))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let registry = state.assembler.registry();
    Json(json!({
        "status": "healthy",
        "device": registry.device(),
        "models_loaded": registry.descriptors().len(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn models_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.assembler.registry().stats();
    Json(json!({
        "service": "Crop/Weed Vision Service",
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "device": stats.device,
        "models": stats.models,
        "unavailable": stats.unavailable,
        "enrichment": state.config.knowledge_config.enabled,
    }))
}
