use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::pipeline::PipelineStage;

/// Top-level error returned to HTTP callers
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Document not found: {document_id}")]
    DocumentNotFound { document_id: String },

    #[error("Database error")]
    Database(#[from] DatabaseError),

    #[error("{0}")]
    Pipeline(#[from] PipelineError),

    #[error("Document processing failed")]
    Stage(#[from] StageError),

    #[error("File too large: {size} bytes (max {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error")]
    Io(#[source] std::io::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Run lifecycle errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("A run is already active for document {document_id}")]
    AlreadyRunning { document_id: String },

    #[error("No run is active for document {document_id}")]
    NotRunning { document_id: String },

    #[error("{stage} stage failed")]
    StageFailure {
        stage: PipelineStage,
        #[source]
        source: StageError,
    },

    #[error("Failed to persist run status")]
    Persist(#[source] DatabaseError),
}

/// Errors raised by individual pipeline stages
#[derive(Error, Debug)]
pub enum StageError {
    #[error("Failed to read document content")]
    Extraction(#[source] std::io::Error),

    #[error("Unsupported file format: {format}")]
    UnsupportedFormat { format: String },

    #[error("No text content could be extracted")]
    EmptyDocument,

    #[error("{0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Produced {vectors} vectors for {chunks} chunks")]
    VectorCount { chunks: usize, vectors: usize },

    #[error("Failed to store chunks")]
    Storage(#[source] DatabaseError),
}

/// Embedding backend errors
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding client initialization failed: {message}")]
    ClientInit { message: String },

    #[error("Connection failed to embedding backend at {url}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Model not found: {model}")]
    ModelNotFound { model: String },

    #[error("Embedding generation failed (status {status}): {message}")]
    Generation { status: u16, message: String },

    #[error("Invalid response from embedding backend")]
    InvalidResponse {
        #[source]
        source: reqwest::Error,
    },
}

/// Failures from the SQLite layer
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed")]
    Connection(#[source] rusqlite::Error),

    #[error("Query failed")]
    Query(#[source] rusqlite::Error),

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed")]
    Serialization(#[source] serde_json::Error),
}

/// API error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::DocumentNotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::Pipeline(PipelineError::AlreadyRunning { .. })
            | ServiceError::Pipeline(PipelineError::NotRunning { .. }) => StatusCode::CONFLICT,
            ServiceError::Stage(StageError::UnsupportedFormat { .. }) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            ServiceError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServiceError::DocumentNotFound { .. } => "document_not_found",
            ServiceError::Database(_) => "database_error",
            ServiceError::Pipeline(PipelineError::AlreadyRunning { .. }) => "already_running",
            ServiceError::Pipeline(PipelineError::NotRunning { .. }) => "not_running",
            ServiceError::Pipeline(PipelineError::StageFailure { .. }) => "stage_failure",
            ServiceError::Pipeline(PipelineError::Persist(_)) => "status_persist_error",
            ServiceError::Stage(StageError::UnsupportedFormat { .. }) => "unsupported_format",
            ServiceError::Stage(StageError::EmptyDocument) => "empty_document",
            ServiceError::Stage(StageError::Extraction(_)) => "extraction_error",
            ServiceError::Stage(_) => "processing_error",
            ServiceError::FileTooLarge { .. } => "file_too_large",
            ServiceError::InvalidRequest { .. } => "invalid_request",
            ServiceError::Config { .. } => "config_error",
            ServiceError::Io(_) => "io_error",
            ServiceError::Internal { .. } => "internal_error",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code().to_string();

        let response = ErrorResponse {
            message: self.to_string(),
            code: Some(code),
        };

        (status, Json(response)).into_response()
    }
}

/// Shorthand for handler results
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Shorthand for SQLite-layer results
pub type DbResult<T> = Result<T, DatabaseError>;

/// Format an error with its source chain, outermost first.
///
/// Display on a layered error only shows the top message; persisted
/// failure text and log lines want the full chain.
pub fn format_error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
