//! Application state, router assembly and server startup.

use super::handlers;
use crate::config::Config;
use crate::db::{MemoryDocumentStore, Registry};
use crate::services::{
    AggregationService, BlobStore, ChainClient, SessionControls, TrainingRunner,
};
use axum::extract::State;
use axum::http::{HeaderValue, Method};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Shared handler state. Everything here is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Registry,
    pub chain: Arc<ChainClient>,
    pub blobs: Arc<BlobStore>,
    pub controls: SessionControls,
    pub runner: TrainingRunner,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let registry = Registry::new(Arc::new(MemoryDocumentStore::new()));
        let chain = Arc::new(ChainClient::new(&config));
        let blobs = Arc::new(BlobStore::new());
        let controls = SessionControls::new();
        let runner = TrainingRunner::new(
            registry.clone(),
            blobs.clone(),
            controls.clone(),
            &config,
        );
        Self {
            config,
            registry,
            chain,
            blobs,
            controls,
            runner,
        }
    }

    pub fn aggregation(&self) -> AggregationService {
        AggregationService::new(self.registry.clone(), self.blobs.clone(), self.chain.clone())
    }
}

async fn root() -> Json<Value> {
    Json(json!({
        "name": "NeuroMesh training backend",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "blobs": state.blobs.len(),
        "active_sessions": state.controls.active_sessions(),
        "timestamp": chrono::Utc::now(),
    }))
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origin = if config.allow_any_origin() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            config
                .allowed_origins
                .iter()
                .filter_map(|o| o.parse::<HeaderValue>().ok()),
        )
    };
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
}

// API Router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        // training control, plus the same surface under the local alias
        .nest("/api/training", handlers::training::router())
        .nest("/api/local-training", handlers::local_training::router())
        .nest("/api/dataset", handlers::dataset::router())
        .nest("/api/demo", handlers::demo::router())
        .nest("/api/models", handlers::models::router())
        .nest("/api/gradients", handlers::gradients::router())
        .nest("/api/contributors", handlers::contributors::router())
        .nest("/api/chain", handlers::chain::router())
        .nest("/api/blobs", handlers::blobs::router())
        .layer(cors_layer(&state.config))
        .with_state(state)
}

// Server startup
pub async fn start_server(config: Config) -> anyhow::Result<()> {
    let bind_addr = config.bind_addr();
    let state = AppState::new(config);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("NeuroMesh backend listening on http://{bind_addr}");
    println!("Endpoints:");
    println!("  GET  /health                              - Health check");
    println!("  POST /api/training/start                  - Start a training session");
    println!("  GET  /api/training/status/:session_id     - Session status and progress");
    println!("  POST /api/training/pause/:session_id      - Pause a running session");
    println!("  POST /api/training/resume/:session_id     - Resume a paused session");
    println!("  POST /api/training/stop/:session_id       - Stop a session");
    println!("  POST /api/dataset/upload                  - Validate and store a dataset");
    println!("  POST /api/demo/run-training               - Deterministic federated demo");
    println!("  POST /api/gradients/upload                - Submit an encoded gradient blob");
    println!("  POST /api/gradients/aggregate/:model_id   - Run an aggregation round");

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
