//! Content extraction stage.
//!
//! Reads the stored file and produces sections, table blocks, and the
//! concatenated full text. Plain text and Markdown are supported
//! natively; anything else fails the stage.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::error::StageError;
use crate::pipeline::{ExtractedContent, PipelineStage, RunArtifact, Section, Stage};

pub struct ExtractStage;

#[async_trait]
impl Stage for ExtractStage {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Extracting
    }

    async fn execute(&self, mut artifact: RunArtifact) -> Result<RunArtifact, StageError> {
        let path = Path::new(&artifact.document.storage_path);
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        let content = std::fs::read_to_string(path).map_err(StageError::Extraction)?;

        let extracted = match extension.as_str() {
            "md" | "markdown" => parse_markdown(&content),
            "txt" | "text" => parse_text(&content),
            _ => return Err(StageError::UnsupportedFormat { format: extension }),
        };

        if extracted.full_text.trim().is_empty() {
            return Err(StageError::EmptyDocument);
        }

        debug!(
            doc_id = %artifact.document.id,
            sections = extracted.sections.len(),
            tables = extracted.tables.len(),
            "Content extracted"
        );

        artifact.extracted = Some(extracted);
        Ok(artifact)
    }
}

/// Section and table split for markdown input.
///
/// `#`-prefixed lines open a new section; pipe-table rows are pulled
/// out into separate table blocks so the chunker can keep each table
/// intact. Full text carries headings, section bodies, and table
/// blocks alike.
fn parse_markdown(content: &str) -> ExtractedContent {
    let mut sections = Vec::new();
    let mut tables: Vec<String> = Vec::new();
    let mut all_text: Vec<String> = Vec::new();

    let mut current_heading: Option<String> = None;
    let mut current_body = String::new();
    let mut table_rows: Vec<String> = Vec::new();

    for line in content.lines() {
        if line.trim_start().starts_with('|') {
            table_rows.push(line.trim().to_string());
            continue;
        }

        if !table_rows.is_empty() {
            let table = table_rows.join("\n");
            all_text.push(table.clone());
            tables.push(table);
            table_rows.clear();
        }

        if line.starts_with('#') {
            // Close out the section in progress
            if !current_body.trim().is_empty() {
                let body = current_body.trim().to_string();
                all_text.push(body.clone());
                sections.push(Section {
                    heading: current_heading.take(),
                    body,
                });
                current_body = String::new();
            }

            let heading = line.trim_start_matches('#').trim().to_string();
            all_text.push(heading.clone());
            current_heading = Some(heading);
        } else {
            current_body.push_str(line);
            current_body.push('\n');
        }
    }

    if !table_rows.is_empty() {
        let table = table_rows.join("\n");
        all_text.push(table.clone());
        tables.push(table);
    }

    // Flush whatever section was still open at the end
    if !current_body.trim().is_empty() {
        let body = current_body.trim().to_string();
        all_text.push(body.clone());
        sections.push(Section {
            heading: current_heading,
            body,
        });
    }

    // If no sections were found, treat the entire content as one section
    if sections.is_empty() && tables.is_empty() && !content.trim().is_empty() {
        let body = content.trim().to_string();
        all_text.push(body.clone());
        sections.push(Section {
            heading: None,
            body,
        });
    }

    ExtractedContent {
        sections,
        tables,
        full_text: all_text.join("\n\n"),
    }
}

/// Plain text: the whole file is one untitled section.
fn parse_text(content: &str) -> ExtractedContent {
    let body = content.trim().to_string();
    ExtractedContent {
        sections: if body.is_empty() {
            Vec::new()
        } else {
            vec![Section {
                heading: None,
                body: body.clone(),
            }]
        },
        tables: Vec::new(),
        full_text: body,
    }
}
