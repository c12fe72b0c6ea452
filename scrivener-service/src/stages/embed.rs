//! Embedding generation stage.
//!
//! One vector per chunk via an Ollama-compatible HTTP backend. The
//! client sits behind a trait so tests run against a deterministic
//! embedder. Vector dimensions must agree across the whole run; the
//! first vector fixes the dimension unless the configuration pins one.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::config::EmbeddingsConfig;
use crate::error::{EmbeddingError, StageError};
use crate::pipeline::{PipelineStage, RunArtifact, Stage};

/// Generates an embedding vector for a piece of text
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

pub struct EmbedStage {
    client: Arc<dyn EmbeddingClient>,
    dimension: Option<usize>,
}

impl EmbedStage {
    pub fn new(client: Arc<dyn EmbeddingClient>, dimension: Option<usize>) -> Self {
        Self { client, dimension }
    }
}

#[async_trait]
impl Stage for EmbedStage {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Embedding
    }

    async fn execute(&self, mut artifact: RunArtifact) -> Result<RunArtifact, StageError> {
        let mut expected = self.dimension;
        let mut embeddings = Vec::with_capacity(artifact.chunks.len());

        for chunk in &artifact.chunks {
            let vector = self.client.embed(&chunk.text).await?;
            match expected {
                Some(dim) if dim != vector.len() => {
                    return Err(StageError::DimensionMismatch {
                        expected: dim,
                        actual: vector.len(),
                    });
                }
                Some(_) => {}
                None => expected = Some(vector.len()),
            }
            embeddings.push(vector);
        }

        debug!(
            doc_id = %artifact.document.id,
            vectors = embeddings.len(),
            dimension = expected.unwrap_or(0),
            "Embeddings generated"
        );

        artifact.embeddings = embeddings;
        Ok(artifact)
    }
}

/// Ollama-compatible embedding backend
pub struct HttpEmbeddingClient {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl HttpEmbeddingClient {
    pub fn new(config: &EmbeddingsConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| EmbeddingError::ClientInit {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/api/embeddings", self.base_url);

        let request = EmbeddingRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbeddingError::Connection {
                url: url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();

            if message.contains("model")
                && (message.contains("not found") || message.contains("does not exist"))
            {
                return Err(EmbeddingError::ModelNotFound {
                    model: self.model.clone(),
                });
            }

            return Err(EmbeddingError::Generation { status, message });
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse { source: e })?;

        Ok(body.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Document, ProcessingStatus};
    use crate::pipeline::DraftChunk;
    use chrono::Utc;

    struct StubClient {
        dimension: usize,
    }

    #[async_trait]
    impl EmbeddingClient for StubClient {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            // Value keyed on the text so alignment is observable.
            Ok(vec![text.len() as f32; self.dimension])
        }
    }

    struct ShrinkingClient {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingClient for ShrinkingClient {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let call = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(vec![0.0; 4 - call])
        }
    }

    struct FailingClient;

    #[async_trait]
    impl EmbeddingClient for FailingClient {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::Generation {
                status: 500,
                message: "backend down".to_string(),
            })
        }
    }

    fn artifact_with_chunks(texts: &[&str]) -> RunArtifact {
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
        artifact.chunks = texts
            .iter()
            .enumerate()
            .map(|(index, text)| DraftChunk {
                index,
                text: text.to_string(),
                section: "introduction".to_string(),
                token_count: 1,
            })
            .collect();
        artifact
    }

    #[tokio::test]
    async fn one_vector_per_chunk_in_order() {
        let stage = EmbedStage::new(Arc::new(StubClient { dimension: 4 }), None);
        let artifact = artifact_with_chunks(&["ab", "abcd", "a"]);

        let artifact = stage.execute(artifact).await.unwrap();
        assert_eq!(artifact.embeddings.len(), 3);
        assert_eq!(artifact.embeddings[0][0], 2.0);
        assert_eq!(artifact.embeddings[1][0], 4.0);
        assert_eq!(artifact.embeddings[2][0], 1.0);
        assert!(artifact.embeddings.iter().all(|v| v.len() == 4));
    }

    #[tokio::test]
    async fn configured_dimension_is_enforced() {
        let stage = EmbedStage::new(Arc::new(StubClient { dimension: 4 }), Some(8));
        let artifact = artifact_with_chunks(&["ab"]);

        let err = stage.execute(artifact).await.unwrap_err();
        assert!(matches!(
            err,
            StageError::DimensionMismatch {
                expected: 8,
                actual: 4
            }
        ));
    }

    #[tokio::test]
    async fn inconsistent_dimensions_across_chunks_fail() {
        let client = ShrinkingClient {
            calls: std::sync::atomic::AtomicUsize::new(0),
        };
        let stage = EmbedStage::new(Arc::new(client), None);
        let artifact = artifact_with_chunks(&["one", "two"]);

        let err = stage.execute(artifact).await.unwrap_err();
        assert!(matches!(
            err,
            StageError::DimensionMismatch {
                expected: 4,
                actual: 3
            }
        ));
    }

    #[tokio::test]
    async fn backend_failure_fails_the_stage() {
        let stage = EmbedStage::new(Arc::new(FailingClient), None);
        let artifact = artifact_with_chunks(&["one"]);

        let err = stage.execute(artifact).await.unwrap_err();
        assert!(matches!(
            err,
            StageError::Embedding(EmbeddingError::Generation { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn no_chunks_means_no_vectors() {
        let stage = EmbedStage::new(Arc::new(StubClient { dimension: 4 }), None);
        let artifact = artifact_with_chunks(&[]);

        let artifact = stage.execute(artifact).await.unwrap();
        assert!(artifact.embeddings.is_empty());
    }

    #[test]
    fn request_wire_shape() {
        let request = EmbeddingRequest {
            model: "nomic-embed-text".to_string(),
            prompt: "chunk text".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"model":"nomic-embed-text","prompt":"chunk text"}"#
        );
    }
}
