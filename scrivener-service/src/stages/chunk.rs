//! Chunking stage.
//!
//! Splits section bodies into overlapping word windows and carries
//! table blocks over as single chunks. Ordinals are assigned from one
//! global counter, so a completed document's chunk indexes are dense
//! `0..N-1` across sections and tables alike.

use async_trait::async_trait;
use tracing::debug;

use crate::error::StageError;
use crate::pipeline::{DraftChunk, PipelineStage, RunArtifact, Stage};

/// Section label applied when a section has no heading
const DEFAULT_SECTION: &str = "introduction";

/// Section label applied to table chunks
const TABLE_SECTION: &str = "table";

const MAX_SECTION_LABEL_LEN: usize = 50;

pub struct ChunkStage {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl ChunkStage {
    /// `chunk_size` and `chunk_overlap` are in words. Overlap is
    /// clamped below the window size so the window always advances.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }
}

#[async_trait]
impl Stage for ChunkStage {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Chunking
    }

    async fn execute(&self, mut artifact: RunArtifact) -> Result<RunArtifact, StageError> {
        let mut chunks = Vec::new();
        let mut index = 0;

        if let Some(extracted) = &artifact.extracted {
            for section in &extracted.sections {
                let label = section
                    .heading
                    .as_deref()
                    .map(section_label)
                    .unwrap_or_else(|| DEFAULT_SECTION.to_string());

                for text in chunk_text(&section.body, self.chunk_size, self.chunk_overlap) {
                    let token_count = estimate_tokens(&text);
                    chunks.push(DraftChunk {
                        index,
                        text,
                        section: label.clone(),
                        token_count,
                    });
                    index += 1;
                }
            }

            for table in &extracted.tables {
                chunks.push(DraftChunk {
                    index,
                    text: table.clone(),
                    section: TABLE_SECTION.to_string(),
                    token_count: estimate_tokens(table),
                });
                index += 1;
            }
        }

        if chunks.is_empty() {
            return Err(StageError::EmptyDocument);
        }

        debug!(
            doc_id = %artifact.document.id,
            chunks = chunks.len(),
            "Document chunked"
        );

        artifact.chunks = chunks;
        Ok(artifact)
    }
}

/// Normalize a heading into a section label
fn section_label(heading: &str) -> String {
    heading
        .to_lowercase()
        .replace(' ', "_")
        .chars()
        .take(MAX_SECTION_LABEL_LEN)
        .collect()
}

/// Split text into overlapping word windows
fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();

    if words.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < words.len() {
        let end = (start + chunk_size).min(words.len());
        let chunk: String = words[start..end].join(" ");
        chunks.push(chunk);

        // Next window begins overlap words before this one ended
        start += chunk_size - overlap;

        // Avoid re-emitting the tail
        if start >= words.len() - overlap && end == words.len() {
            break;
        }
    }

    chunks
}

/// Rough token estimate, about 1.33 tokens per word
fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count() * 133 / 100
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Document, ProcessingStatus};
    use crate::pipeline::{ExtractedContent, Section};
    use chrono::Utc;

    fn artifact_with(extracted: ExtractedContent) -> RunArtifact {
        let document = Document {
            id: "doc-1".to_string(),
            filename: "a.md".to_string(),
            storage_path: "/tmp/a.md".to_string(),
            file_hash: "hash".to_string(),
            status: ProcessingStatus::Pending,
            error: None,
            metadata: None,
            chunk_count: 0,
            submitted_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        };
        let mut artifact = RunArtifact::new(document);
        artifact.extracted = Some(extracted);
        artifact
    }

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunk_text("one two three", 10, 2);
        assert_eq!(chunks, vec!["one two three".to_string()]);
    }

    #[test]
    fn windows_overlap_by_the_configured_amount() {
        let text = words(25);
        let chunks = chunk_text(&text, 10, 3);

        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let left: Vec<&str> = pair[0].split_whitespace().collect();
            let right: Vec<&str> = pair[1].split_whitespace().collect();
            // Each window starts on the last `overlap` words of the
            // previous one.
            assert_eq!(&left[left.len() - 3..], &right[..3]);
        }
    }

    #[test]
    fn every_word_lands_in_some_chunk() {
        let text = words(47);
        let chunks = chunk_text(&text, 10, 3);
        let all: String = chunks.join(" ");
        for i in 0..47 {
            assert!(all.contains(&format!("w{i} ")) || all.ends_with(&format!("w{i}")));
        }
    }

    #[test]
    fn section_labels_are_normalized() {
        assert_eq!(
            section_label("Detailed Description"),
            "detailed_description"
        );
        let long = "A".repeat(80);
        assert_eq!(section_label(&long).chars().count(), 50);
    }

    #[test]
    fn token_estimate_scales_with_words() {
        assert_eq!(estimate_tokens(&words(100)), 133);
        assert_eq!(estimate_tokens("one two three"), 3);
        assert_eq!(estimate_tokens(""), 0);
    }

    #[tokio::test]
    async fn ordinals_are_dense_across_sections_and_tables() {
        let artifact = artifact_with(ExtractedContent {
            sections: vec![
                Section {
                    heading: Some("Summary".to_string()),
                    body: words(25),
                },
                Section {
                    heading: None,
                    body: "short tail section".to_string(),
                },
            ],
            tables: vec!["| a | b |\n| 1 | 2 |".to_string()],
            full_text: String::new(),
        });

        let stage = ChunkStage::new(10, 3);
        let artifact = stage.execute(artifact).await.unwrap();

        let indexes: Vec<usize> = artifact.chunks.iter().map(|c| c.index).collect();
        let expected: Vec<usize> = (0..artifact.chunks.len()).collect();
        assert_eq!(indexes, expected);

        // The table takes the last ordinal, after all section chunks.
        let last = artifact.chunks.last().unwrap();
        assert_eq!(last.section, "table");
        assert!(last.text.contains("| 1 | 2 |"));

        // Section labels: normalized heading, then the default.
        assert_eq!(artifact.chunks[0].section, "summary");
        let tail = artifact
            .chunks
            .iter()
            .find(|c| c.text == "short tail section")
            .unwrap();
        assert_eq!(tail.section, "introduction");
    }

    #[tokio::test]
    async fn chunking_nothing_fails() {
        let artifact = artifact_with(ExtractedContent {
            sections: Vec::new(),
            tables: Vec::new(),
            full_text: String::new(),
        });
        let err = ChunkStage::new(10, 3).execute(artifact).await.unwrap_err();
        assert!(matches!(err, StageError::EmptyDocument));
    }

    #[tokio::test]
    async fn token_counts_are_attached_to_chunks() {
        let artifact = artifact_with(ExtractedContent {
            sections: vec![Section {
                heading: None,
                body: words(100),
            }],
            tables: Vec::new(),
            full_text: String::new(),
        });
        let artifact = ChunkStage::new(200, 20).execute(artifact).await.unwrap();
        assert_eq!(artifact.chunks.len(), 1);
        assert_eq!(artifact.chunks[0].token_count, 133);
    }
}
