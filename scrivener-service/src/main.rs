use std::sync::Arc;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::info;

mod api;
mod config;
mod db;
mod error;
mod hash;
mod pipeline;
mod stages;
mod websocket;

use crate::api::AppState;
use crate::config::StaticConfig;
use crate::db::Database;
use crate::pipeline::{Orchestrator, ProgressBus, RunRegistry, StageSet};
use crate::stages::{
    ChunkStage, ClassifyStage, EmbedStage, ExtractStage, HttpEmbeddingClient, StoreStage,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logging first so startup failures are visible
    init_logging();

    info!(
        "Starting Scrivener service v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = StaticConfig::load()?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        "Configuration loaded"
    );

    // Ensure storage directories exist before anything touches them
    std::fs::create_dir_all(config.documents_dir())?;

    let db_path = config.database_path();
    let db = Arc::new(Database::open(&db_path)?);
    info!(path = %db_path.display(), "Database initialized");

    // Runs that were live when the previous process died are marked
    // failed so their documents can be resubmitted.
    let reset = db.reset_interrupted_runs()?;
    if reset > 0 {
        info!(count = reset, "Marked interrupted runs as failed");
    }

    let metrics = PrometheusBuilder::new().install_recorder()?;

    let bus = Arc::new(ProgressBus::new(config.processing.observer_buffer));
    let registry = Arc::new(RunRegistry::new());

    let embedding_client = Arc::new(HttpEmbeddingClient::new(&config.embeddings)?);
    let stages = StageSet {
        extract: Arc::new(ExtractStage),
        classify: Arc::new(ClassifyStage),
        chunk: Arc::new(ChunkStage::new(
            config.processing.chunk_size,
            config.processing.chunk_overlap,
        )),
        embed: Arc::new(EmbedStage::new(
            embedding_client,
            config.embeddings.dimension,
        )),
        store: Arc::new(StoreStage::new(
            Arc::clone(&db),
            config.embeddings.model.clone(),
        )),
    };

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&db),
        Arc::clone(&bus),
        Arc::clone(&registry),
        stages,
    ));

    let state = Arc::new(AppState {
        db,
        orchestrator,
        bus,
        registry,
        config: config.clone(),
        metrics,
        start_time: Instant::now(),
    });

    let app = api::router(state);

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // RUST_LOG wins when present; otherwise default our crate to info
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("scrivener_service=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
