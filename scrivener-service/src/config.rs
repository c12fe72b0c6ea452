use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{ServiceError, ServiceResult};

/// Service configuration, loaded once at startup
#[derive(Debug, Clone, Deserialize)]
pub struct StaticConfig {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    #[serde(default = "default_processing")]
    pub processing: ProcessingConfig,

    #[serde(default = "default_embeddings")]
    pub embeddings: EmbeddingsConfig,
}

/// Bind address settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// On-disk layout settings
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Pipeline tuning
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    /// Chunk window size in words
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Word overlap between consecutive chunks
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default = "default_max_document_size")]
    pub max_document_size_bytes: u64,

    /// Progress events buffered per observer before it is dropped
    #[serde(default = "default_observer_buffer")]
    pub observer_buffer: usize,
}

/// Embedding backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    #[serde(default = "default_embeddings_url")]
    pub base_url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Expected vector dimension. Unset means the first vector of each
    /// run fixes it.
    #[serde(default)]
    pub dimension: Option<usize>,
}

impl StaticConfig {
    /// Load configuration from an optional `config` file plus
    /// `SCRIVENER__`-prefixed environment variables.
    pub fn load() -> ServiceResult<Self> {
        Config::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("SCRIVENER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ServiceError::Config {
                message: format!("Failed to build config: {}", e),
            })?
            .try_deserialize()
            .map_err(|e| ServiceError::Config {
                message: format!("Failed to deserialize config: {}", e),
            })
    }

    /// Directory uploaded files are stored under
    pub fn documents_dir(&self) -> PathBuf {
        self.storage.data_dir.join("documents")
    }

    pub fn database_path(&self) -> PathBuf {
        self.storage.data_dir.join("scrivener.db")
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            storage: default_storage(),
            processing: default_processing(),
            embeddings: default_embeddings(),
        }
    }
}

fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_storage() -> StorageConfig {
    StorageConfig {
        data_dir: default_data_dir(),
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_processing() -> ProcessingConfig {
    ProcessingConfig {
        chunk_size: default_chunk_size(),
        chunk_overlap: default_chunk_overlap(),
        max_document_size_bytes: default_max_document_size(),
        observer_buffer: default_observer_buffer(),
    }
}

fn default_chunk_size() -> usize {
    512
}

fn default_chunk_overlap() -> usize {
    64
}

fn default_max_document_size() -> u64 {
    104_857_600 // 100MB
}

fn default_observer_buffer() -> usize {
    64
}

fn default_embeddings() -> EmbeddingsConfig {
    EmbeddingsConfig {
        base_url: default_embeddings_url(),
        model: default_embedding_model(),
        dimension: None,
    }
}

fn default_embeddings_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
