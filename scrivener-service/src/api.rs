//! HTTP API for the scrivener service.
//!
//! REST endpoints for document upload and management, run control,
//! and the per-document progress WebSocket, plus health and metrics.

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, State, WebSocketUpgrade},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{delete, get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::StaticConfig;
use crate::db::Database;
use crate::pipeline::{Orchestrator, ProgressBus, RunRegistry};
use crate::websocket::serve_progress;

pub mod documents;

use documents::{
    cancel_document_handler, delete_document_handler, get_document_chunks_handler,
    get_document_handler, list_documents_handler, process_document_handler,
    upload_document_handler,
};

/// Shared state handed to every handler
pub struct AppState {
    pub db: Arc<Database>,
    pub orchestrator: Arc<Orchestrator>,
    pub bus: Arc<ProgressBus>,
    pub registry: Arc<RunRegistry>,
    pub config: StaticConfig,
    pub metrics: PrometheusHandle,
    pub start_time: Instant,
}

/// Assemble the full route tree and middleware stack
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Uploads get the configured document size as their body limit
    let max_body_size = state.config.processing.max_document_size_bytes as usize;

    let api_routes = Router::new()
        .route("/documents", get(list_documents_handler))
        .route(
            "/documents",
            post(upload_document_handler).layer(DefaultBodyLimit::max(max_body_size)),
        )
        .route("/documents/{id}", get(get_document_handler))
        .route("/documents/{id}", delete(delete_document_handler))
        .route("/documents/{id}/chunks", get(get_document_chunks_handler))
        .route("/documents/{id}/process", post(process_document_handler))
        .route("/documents/{id}/cancel", post(cancel_document_handler));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/ws/{document_id}", get(ws_handler))
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Health & Metrics ===

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        active_runs: state.registry.active_count(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    active_runs: usize,
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

// === WebSocket ===

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(document_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    info!(doc_id = %document_id, "Progress observer connecting");
    let bus = Arc::clone(&state.bus);
    ws.on_upgrade(move |socket| serve_progress(socket, bus, document_id))
}
