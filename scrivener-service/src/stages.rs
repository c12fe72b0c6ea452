//! Concrete pipeline stages.
//!
//! Each submodule implements one [`Stage`](crate::pipeline::Stage) in
//! the fixed sequence. Stages only transform the run artifact; run
//! bookkeeping lives in `crate::pipeline`.

pub mod chunk;
pub mod classify;
pub mod embed;
pub mod extract;
pub mod store;

pub use chunk::ChunkStage;
pub use classify::ClassifyStage;
pub use embed::{EmbedStage, EmbeddingClient, HttpEmbeddingClient};
pub use extract::ExtractStage;
pub use store::StoreStage;
