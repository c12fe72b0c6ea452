//! Stage interface and the artifact handed between stages.
//!
//! A run owns one `RunArtifact` that accumulates each stage's output;
//! stages take it by value and hand it back enriched. Concrete
//! implementations live in `crate::stages`.

use std::sync::Arc;

use async_trait::async_trait;

use super::progress::PipelineStage;
use crate::db::Document;
use crate::error::StageError;

/// A section of extracted text, optionally under a heading
#[derive(Debug, Clone)]
pub struct Section {
    pub heading: Option<String>,
    pub body: String,
}

/// Output of the extract stage
#[derive(Debug, Clone, Default)]
pub struct ExtractedContent {
    pub sections: Vec<Section>,
    /// Table blocks pulled out of the document, chunked separately
    pub tables: Vec<String>,
    pub full_text: String,
}

/// Output of the classify stage
#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub domains: Vec<String>,
    pub technical_terms: Vec<String>,
    pub cpc_hints: Vec<String>,
}

/// A chunk produced by the chunk stage, not yet persisted
#[derive(Debug, Clone)]
pub struct DraftChunk {
    /// Position in the document's chunk sequence, dense from 0
    pub index: usize,
    pub text: String,
    pub section: String,
    pub token_count: usize,
}

/// Everything a run has produced so far
#[derive(Debug, Clone)]
pub struct RunArtifact {
    pub document: Document,
    pub extracted: Option<ExtractedContent>,
    pub classification: Option<Classification>,
    pub chunks: Vec<DraftChunk>,
    /// One vector per chunk, aligned by position
    pub embeddings: Vec<Vec<f32>>,
    pub stored_chunks: usize,
}

impl RunArtifact {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            extracted: None,
            classification: None,
            chunks: Vec::new(),
            embeddings: Vec::new(),
            stored_chunks: 0,
        }
    }
}

/// A single pipeline stage.
///
/// Implementations are pure with respect to run bookkeeping: status
/// persistence, progress events, and cancellation all belong to the
/// orchestrator. A stage only transforms the artifact or fails.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Which stage of the sequence this implementation fills
    fn stage(&self) -> PipelineStage;

    async fn execute(&self, artifact: RunArtifact) -> Result<RunArtifact, StageError>;
}

/// The five concrete stages of the pipeline, in execution order
#[derive(Clone)]
pub struct StageSet {
    pub extract: Arc<dyn Stage>,
    pub classify: Arc<dyn Stage>,
    pub chunk: Arc<dyn Stage>,
    pub embed: Arc<dyn Stage>,
    pub store: Arc<dyn Stage>,
}

impl StageSet {
    /// Stages in the fixed order every run walks
    pub fn sequence(&self) -> [Arc<dyn Stage>; 5] {
        [
            Arc::clone(&self.extract),
            Arc::clone(&self.classify),
            Arc::clone(&self.chunk),
            Arc::clone(&self.embed),
            Arc::clone(&self.store),
        ]
    }
}
