//! Record types read from and written to SQLite.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineStage;

/// Persisted processing status for documents.
///
/// Tracks which stage a run is in; survives process restart. Terminal
/// states are `completed`, `failed`, and `cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Admitted, no stage entered yet
    Pending,
    Extracting,
    Classifying,
    Chunking,
    Embedding,
    Storing,
    /// Run finished successfully
    Completed,
    /// Run failed in some stage
    Failed,
    /// Run was cancelled at a stage boundary
    Cancelled,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Extracting => "extracting",
            ProcessingStatus::Classifying => "classifying",
            ProcessingStatus::Chunking => "chunking",
            ProcessingStatus::Embedding => "embedding",
            ProcessingStatus::Storing => "storing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
            ProcessingStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "extracting" => ProcessingStatus::Extracting,
            "classifying" => ProcessingStatus::Classifying,
            "chunking" => ProcessingStatus::Chunking,
            "embedding" => ProcessingStatus::Embedding,
            "storing" => ProcessingStatus::Storing,
            "completed" => ProcessingStatus::Completed,
            "failed" => ProcessingStatus::Failed,
            "cancelled" => ProcessingStatus::Cancelled,
            _ => ProcessingStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessingStatus::Completed | ProcessingStatus::Failed | ProcessingStatus::Cancelled
        )
    }
}

impl From<PipelineStage> for ProcessingStatus {
    fn from(stage: PipelineStage) -> Self {
        match stage {
            PipelineStage::Extracting => ProcessingStatus::Extracting,
            PipelineStage::Classifying => ProcessingStatus::Classifying,
            PipelineStage::Chunking => ProcessingStatus::Chunking,
            PipelineStage::Embedding => ProcessingStatus::Embedding,
            PipelineStage::Storing => ProcessingStatus::Storing,
            PipelineStage::Complete => ProcessingStatus::Completed,
            PipelineStage::Failed => ProcessingStatus::Failed,
            PipelineStage::Cancelled => ProcessingStatus::Cancelled,
        }
    }
}

/// One uploaded document and its last-known run state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub storage_path: String,
    pub file_hash: String,
    pub status: ProcessingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub chunk_count: usize,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Document {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let status_str: String = row.get(4)?;
        let metadata_str: Option<String> = row.get(6)?;
        let submitted_at_str: String = row.get(7)?;
        let updated_at_str: String = row.get(8)?;
        let completed_at_str: Option<String> = row.get(9)?;
        let chunk_count: i64 = row.get(10)?;

        Ok(Self {
            id: row.get(0)?,
            filename: row.get(1)?,
            storage_path: row.get(2)?,
            file_hash: row.get(3)?,
            status: ProcessingStatus::from_str(&status_str),
            error: row.get(5)?,
            metadata: metadata_str.and_then(|s| serde_json::from_str(&s).ok()),
            chunk_count: chunk_count as usize,
            submitted_at: parse_timestamp(&submitted_at_str),
            updated_at: parse_timestamp(&updated_at_str),
            completed_at: completed_at_str.as_deref().map(parse_timestamp),
        })
    }
}

/// One stored chunk of a completed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub chunk_index: i32,
    pub section: Option<String>,
    pub token_count: usize,
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let token_count: i64 = row.get(5)?;
        let created_at_str: String = row.get(6)?;

        Ok(Self {
            id: row.get(0)?,
            document_id: row.get(1)?,
            content: row.get(2)?,
            chunk_index: row.get(3)?,
            section: row.get(4)?,
            token_count: token_count as usize,
            created_at: parse_timestamp(&created_at_str),
        })
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
