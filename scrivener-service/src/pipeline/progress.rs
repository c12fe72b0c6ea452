//! Pipeline stage identity and progress events.
//!
//! Defines the fixed stage sequence, the percent milestone each stage
//! reports, and the event/wire types observers receive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline stages as reported to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Text and section extraction from the stored file
    Extracting,
    /// Domain classification over the extracted text
    Classifying,
    /// Splitting sections into retrieval-sized chunks
    Chunking,
    /// Vector generation for each chunk
    Embedding,
    /// Transactional persistence of chunks and vectors
    Storing,
    /// Terminal: the run finished successfully
    Complete,
    /// Terminal: a stage failed
    Failed,
    /// Terminal: the run was cancelled at a stage boundary
    Cancelled,
}

/// Execution order of the work stages. Every run walks this sequence
/// front to back; there is no skipping or reordering.
pub const STAGE_SEQUENCE: [PipelineStage; 5] = [
    PipelineStage::Extracting,
    PipelineStage::Classifying,
    PipelineStage::Chunking,
    PipelineStage::Embedding,
    PipelineStage::Storing,
];

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Extracting => "extracting",
            PipelineStage::Classifying => "classifying",
            PipelineStage::Chunking => "chunking",
            PipelineStage::Embedding => "embedding",
            PipelineStage::Storing => "storing",
            PipelineStage::Complete => "complete",
            PipelineStage::Failed => "failed",
            PipelineStage::Cancelled => "cancelled",
        }
    }

    /// Fixed percent milestone reported when this stage is entered.
    ///
    /// The values are part of the wire contract; clients key progress
    /// bars off them. `failed` and `cancelled` report 0 rather than the
    /// last milestone so a terminal frame never implies partial success.
    pub fn percent(&self) -> u8 {
        match self {
            PipelineStage::Extracting => 20,
            PipelineStage::Classifying => 35,
            PipelineStage::Chunking => 50,
            PipelineStage::Embedding => 70,
            PipelineStage::Storing => 85,
            PipelineStage::Complete => 100,
            PipelineStage::Failed => 0,
            PipelineStage::Cancelled => 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineStage::Complete | PipelineStage::Failed | PipelineStage::Cancelled
        )
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress event published on the bus when a run enters a stage or
/// reaches a terminal state
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub document_id: String,
    pub stage: PipelineStage,
    pub progress: u8,
    pub error: Option<String>,
    pub emitted_at: DateTime<Utc>,
}

impl ProgressEvent {
    /// Event for entering a work stage
    pub fn stage_entry(document_id: impl Into<String>, stage: PipelineStage) -> Self {
        Self {
            document_id: document_id.into(),
            stage,
            progress: stage.percent(),
            error: None,
            emitted_at: Utc::now(),
        }
    }

    /// Terminal success event
    pub fn completed(document_id: impl Into<String>) -> Self {
        Self::stage_entry(document_id, PipelineStage::Complete)
    }

    /// Terminal failure event carrying the cause
    pub fn failed(document_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            stage: PipelineStage::Failed,
            progress: PipelineStage::Failed.percent(),
            error: Some(error.into()),
            emitted_at: Utc::now(),
        }
    }

    /// Terminal cancellation event
    pub fn cancelled(document_id: impl Into<String>) -> Self {
        Self::stage_entry(document_id, PipelineStage::Cancelled)
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

/// Wire representation of a progress event.
///
/// Exactly three keys in this order; `error` is always present and null
/// unless the stage is `failed`. Existing clients parse this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressFrame {
    pub stage: PipelineStage,
    pub progress: u8,
    pub error: Option<String>,
}

impl From<&ProgressEvent> for ProgressFrame {
    fn from(event: &ProgressEvent) -> Self {
        Self {
            stage: event.stage,
            progress: event.progress,
            error: event.error.clone(),
        }
    }
}
