//! Document row reads and writes.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use super::Database;
use super::models::{Document, ProcessingStatus};
use crate::error::{DatabaseError, DbResult};

const DOCUMENT_COLUMNS: &str = "d.id, d.filename, d.storage_path, d.file_hash, d.status, d.error, d.metadata, d.submitted_at, d.updated_at, d.completed_at, \
     (SELECT COUNT(*) FROM chunks WHERE document_id = d.id) as chunk_count";

impl Database {
    /// Record a freshly uploaded document
    pub fn insert_document(&self, doc: &Document) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();

        let metadata_json = doc
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(DatabaseError::Serialization)?;

        conn.execute(
            r#"
            INSERT INTO documents (id, filename, storage_path, file_hash, status, error, metadata, submitted_at, updated_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                doc.id,
                doc.filename,
                doc.storage_path,
                doc.file_hash,
                doc.status.as_str(),
                doc.error,
                metadata_json,
                doc.submitted_at.to_rfc3339(),
                doc.updated_at.to_rfc3339(),
                doc.completed_at.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Look up a single document
    pub fn get_document(&self, id: &str) -> DbResult<Option<Document>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            &format!("SELECT {DOCUMENT_COLUMNS} FROM documents d WHERE d.id = ?1"),
            params![id],
            Document::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
    }

    /// List all documents, newest first
    pub fn list_documents(&self) -> DbResult<Vec<Document>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents d ORDER BY d.submitted_at DESC, d.id"
            ))
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map([], Document::from_row)
            .map_err(DatabaseError::Query)?;

        let mut docs = Vec::new();
        for row in rows {
            docs.push(row.map_err(DatabaseError::Query)?);
        }

        Ok(docs)
    }

    /// Update a document's processing status.
    ///
    /// `completed_at` is stamped when the status becomes `completed` and
    /// left untouched otherwise. Returns false when the document does
    /// not exist.
    pub fn update_status(
        &self,
        document_id: &str,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> DbResult<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let rows = if status == ProcessingStatus::Completed {
            conn.execute(
                "UPDATE documents SET status = ?1, error = ?2, updated_at = ?3, completed_at = ?3 WHERE id = ?4",
                params![status.as_str(), error, now, document_id],
            )
        } else {
            conn.execute(
                "UPDATE documents SET status = ?1, error = ?2, updated_at = ?3 WHERE id = ?4",
                params![status.as_str(), error, now, document_id],
            )
        }
        .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Remove a document; chunks and embeddings cascade
    pub fn delete_document(&self, id: &str) -> DbResult<bool> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute("DELETE FROM documents WHERE id = ?1", params![id])
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Mark every document stuck in a non-terminal status as failed.
    ///
    /// Called once at startup. A non-terminal status on boot means the
    /// previous process died mid-run; there is no run to resume, so the
    /// honest answer is a failed record the caller can re-submit.
    pub fn reset_interrupted_runs(&self) -> DbResult<usize> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute(
                "UPDATE documents SET status = 'failed', error = 'interrupted by restart', updated_at = ?1 \
                 WHERE status NOT IN ('completed', 'failed', 'cancelled')",
                params![Utc::now().to_rfc3339()],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows)
    }
}
