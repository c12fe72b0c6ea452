//! Document handlers.
//!
//! Handlers for upload, listing, retrieval, deletion, chunk access,
//! and run control (process/cancel).

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::{Chunk, Document, ProcessingStatus};
use crate::error::{PipelineError, ServiceError, StageError};
use crate::hash::content_hash;

use super::AppState;

/// Formats the extract stage can read
const ALLOWED_EXTENSIONS: [&str; 4] = ["txt", "text", "md", "markdown"];

/// Chunks returned when the query does not say otherwise
const DEFAULT_CHUNK_LIMIT: usize = 100;

/// Chunk listing query parameters
#[derive(Deserialize)]
pub struct ChunksParams {
    pub limit: Option<usize>,
}

/// Body returned by the delete handler
#[derive(Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

/// Response for starting a run
#[derive(Serialize)]
pub struct ProcessResponse {
    pub document_id: String,
    pub status: ProcessingStatus,
}

/// Response for cancel requests.
///
/// `cancelled: false` means no run was active, which is not an error.
#[derive(Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// List all documents
pub async fn list_documents_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Document>>, ServiceError> {
    let documents = state.db.list_documents()?;
    Ok(Json(documents))
}

/// Upload a new document and start its first run
pub async fn upload_document_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Document>, ServiceError> {
    let mut file_data: Option<(Vec<u8>, String)> = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or("").to_string();

        if name == "file" {
            let filename = field.file_name().unwrap_or("document").to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| ServiceError::InvalidRequest {
                    message: e.to_string(),
                })?;
            file_data = Some((data.to_vec(), filename));
        }
    }

    let (data, raw_name) = file_data.ok_or_else(|| ServiceError::InvalidRequest {
        message: "No file provided".to_string(),
    })?;

    let max_size = state.config.processing.max_document_size_bytes;
    if data.len() as u64 > max_size {
        return Err(ServiceError::FileTooLarge {
            size: data.len() as u64,
            max: max_size,
        });
    }

    // Client-supplied names can carry path components; keep only the
    // final segment.
    let filename = std::path::Path::new(&raw_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document")
        .to_string();

    let extension = std::path::Path::new(&filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(StageError::UnsupportedFormat { format: extension }.into());
    }

    let file_hash = content_hash(&data);
    let doc_id = uuid::Uuid::new_v4().to_string();

    let docs_dir = state.config.documents_dir();
    std::fs::create_dir_all(&docs_dir).map_err(ServiceError::Io)?;

    let storage_path = docs_dir.join(format!("{}_{}", doc_id, filename));
    std::fs::write(&storage_path, &data).map_err(ServiceError::Io)?;

    let now = chrono::Utc::now();
    let document = Document {
        id: doc_id,
        filename,
        storage_path: storage_path.to_string_lossy().to_string(),
        file_hash,
        status: ProcessingStatus::Pending,
        error: None,
        metadata: None,
        chunk_count: 0,
        submitted_at: now,
        updated_at: now,
        completed_at: None,
    };
    state.db.insert_document(&document)?;

    metrics::counter!("scrivener_documents_uploaded_total").increment(1);
    info!(
        doc_id = %document.id,
        filename = %document.filename,
        size = data.len(),
        "Document uploaded"
    );

    state.orchestrator.start_run(&document)?;

    Ok(Json(document))
}

/// Fetch one document record with its current status
pub async fn get_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Document>, ServiceError> {
    let document = state
        .db
        .get_document(&id)?
        .ok_or(ServiceError::DocumentNotFound { document_id: id })?;

    Ok(Json(document))
}

/// Get a document's chunks in ordinal order, embeddings elided
pub async fn get_document_chunks_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ChunksParams>,
) -> Result<Json<Vec<Chunk>>, ServiceError> {
    if state.db.get_document(&id)?.is_none() {
        return Err(ServiceError::DocumentNotFound { document_id: id });
    }

    let limit = params.limit.unwrap_or(DEFAULT_CHUNK_LIMIT);
    let chunks = state.db.get_chunks(&id, Some(limit))?;
    Ok(Json(chunks))
}

/// Re-run an existing document through the pipeline
pub async fn process_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ProcessResponse>, ServiceError> {
    let document = state
        .db
        .get_document(&id)?
        .ok_or_else(|| ServiceError::DocumentNotFound {
            document_id: id.clone(),
        })?;

    let ticket = state.orchestrator.start_run(&document)?;

    Ok(Json(ProcessResponse {
        document_id: ticket.document_id().to_string(),
        status: ProcessingStatus::Pending,
    }))
}

/// Request cancellation of a document's active run
pub async fn cancel_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ServiceError> {
    match state.orchestrator.cancel_run(&id) {
        Ok(()) => Ok(Json(CancelResponse { cancelled: true })),
        Err(PipelineError::NotRunning { .. }) => Ok(Json(CancelResponse { cancelled: false })),
        Err(e) => Err(e.into()),
    }
}

/// Delete a document, its chunks, and its stored file
pub async fn delete_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ServiceError> {
    let document = state
        .db
        .get_document(&id)?
        .ok_or_else(|| ServiceError::DocumentNotFound {
            document_id: id.clone(),
        })?;

    // A non-terminal status means a run may still be active; stop it
    // before its rows go away.
    if !document.status.is_terminal() {
        let _ = state.orchestrator.cancel_run(&id);
    }

    state.db.delete_document(&id)?;

    if let Err(e) = std::fs::remove_file(&document.storage_path) {
        warn!(doc_id = %id, error = %e, "Failed to remove stored file");
    }

    info!(doc_id = %id, "Document deleted");
    Ok(Json(DeleteResponse {
        success: true,
        message: format!("Deleted document {}", id),
    }))
}
