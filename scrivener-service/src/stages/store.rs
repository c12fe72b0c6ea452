//! Persistence stage.
//!
//! Turns draft chunks into durable rows and writes them with their
//! vectors and the document metadata in one transaction. A failure
//! leaves no partial chunk set behind.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::db::{Chunk, Database};
use crate::error::StageError;
use crate::pipeline::{PipelineStage, RunArtifact, Stage};

pub struct StoreStage {
    db: Arc<Database>,
    embedding_model: String,
}

impl StoreStage {
    pub fn new(db: Arc<Database>, embedding_model: impl Into<String>) -> Self {
        Self {
            db,
            embedding_model: embedding_model.into(),
        }
    }
}

#[async_trait]
impl Stage for StoreStage {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Storing
    }

    async fn execute(&self, mut artifact: RunArtifact) -> Result<RunArtifact, StageError> {
        if artifact.embeddings.len() != artifact.chunks.len() {
            return Err(StageError::VectorCount {
                chunks: artifact.chunks.len(),
                vectors: artifact.embeddings.len(),
            });
        }

        let now = Utc::now();
        let chunks: Vec<Chunk> = artifact
            .chunks
            .iter()
            .map(|draft| Chunk {
                id: Uuid::new_v4().to_string(),
                document_id: artifact.document.id.clone(),
                content: draft.text.clone(),
                chunk_index: draft.index as i32,
                section: Some(draft.section.clone()),
                token_count: draft.token_count,
                created_at: now,
            })
            .collect();

        let classification = artifact.classification.clone().unwrap_or_default();
        let has_tables = artifact
            .extracted
            .as_ref()
            .is_some_and(|e| !e.tables.is_empty());
        let metadata = json!({
            "total_chunks": chunks.len(),
            "domains": classification.domains,
            "technical_terms": classification.technical_terms,
            "cpc_hints": classification.cpc_hints,
            "has_tables": has_tables,
            "embedding_model": self.embedding_model,
            "embedding_dimension": artifact.embeddings.first().map(Vec::len),
        });

        let stored = self
            .db
            .save_chunks(
                &artifact.document.id,
                &chunks,
                &artifact.embeddings,
                Some(&metadata),
            )
            .map_err(StageError::Storage)?;

        debug!(doc_id = %artifact.document.id, chunks = stored, "Chunks stored");

        artifact.stored_chunks = stored;
        Ok(artifact)
    }
}
