//! Chunk persistence and embedding storage.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use super::Database;
use super::models::Chunk;
use crate::error::{DatabaseError, DbResult};

impl Database {
    /// Replace a document's chunks and vectors in one transaction.
    ///
    /// Existing chunks for the document are deleted (embeddings cascade),
    /// the new set is inserted, and the document's metadata is updated,
    /// all atomically. Either every chunk and vector lands or none do.
    ///
    /// `chunks` and `embeddings` are aligned by position; the store stage
    /// verifies the lengths match before calling.
    pub fn save_chunks(
        &self,
        document_id: &str,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
        metadata: Option<&serde_json::Value>,
    ) -> DbResult<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        tx.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![document_id],
        )
        .map_err(DatabaseError::Query)?;

        for (chunk, embedding) in chunks.iter().zip(embeddings.iter()) {
            tx.execute(
                r#"
                INSERT INTO chunks (id, document_id, content, chunk_index, section, token_count, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    chunk.id,
                    chunk.document_id,
                    chunk.content,
                    chunk.chunk_index,
                    chunk.section,
                    chunk.token_count as i64,
                    chunk.created_at.to_rfc3339(),
                ],
            )
            .map_err(DatabaseError::Query)?;

            let embedding_bytes: Vec<u8> = embedding.iter().flat_map(|f| f.to_le_bytes()).collect();
            tx.execute(
                "INSERT INTO chunk_embeddings (chunk_id, embedding) VALUES (?1, ?2)",
                params![chunk.id, embedding_bytes],
            )
            .map_err(DatabaseError::Query)?;
        }

        if let Some(metadata) = metadata {
            tx.execute(
                "UPDATE documents SET metadata = ?1, updated_at = ?2 WHERE id = ?3",
                params![metadata.to_string(), Utc::now().to_rfc3339(), document_id],
            )
            .map_err(DatabaseError::Query)?;
        }

        tx.commit().map_err(DatabaseError::Query)?;

        Ok(chunks.len())
    }

    /// Get a document's chunks ordered by their position
    pub fn get_chunks(&self, document_id: &str, limit: Option<usize>) -> DbResult<Vec<Chunk>> {
        let conn = self.conn.lock().unwrap();

        let mut chunks = Vec::new();

        if let Some(limit) = limit {
            let mut stmt = conn
                .prepare(
                    "SELECT id, document_id, content, chunk_index, section, token_count, created_at \
                     FROM chunks WHERE document_id = ?1 ORDER BY chunk_index LIMIT ?2",
                )
                .map_err(DatabaseError::Query)?;
            let rows = stmt
                .query_map(params![document_id, limit as i64], Chunk::from_row)
                .map_err(DatabaseError::Query)?;
            for row in rows {
                chunks.push(row.map_err(DatabaseError::Query)?);
            }
        } else {
            let mut stmt = conn
                .prepare(
                    "SELECT id, document_id, content, chunk_index, section, token_count, created_at \
                     FROM chunks WHERE document_id = ?1 ORDER BY chunk_index",
                )
                .map_err(DatabaseError::Query)?;
            let rows = stmt
                .query_map(params![document_id], Chunk::from_row)
                .map_err(DatabaseError::Query)?;
            for row in rows {
                chunks.push(row.map_err(DatabaseError::Query)?);
            }
        }

        Ok(chunks)
    }

    /// Number of chunks currently stored for a document
    pub fn get_chunk_count(&self, document_id: &str) -> DbResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM chunks WHERE document_id = ?1",
                params![document_id],
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)?;
        Ok(count as usize)
    }

    /// Get a chunk's stored embedding vector
    pub fn get_embedding(&self, chunk_id: &str) -> DbResult<Option<Vec<f32>>> {
        let conn = self.conn.lock().unwrap();

        let bytes: Option<Vec<u8>> = conn
            .query_row(
                "SELECT embedding FROM chunk_embeddings WHERE chunk_id = ?1",
                params![chunk_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(DatabaseError::Query)?;

        Ok(bytes.map(|bytes| {
            bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect()
        }))
    }
}
