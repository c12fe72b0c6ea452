//! Pipeline orchestration.
//!
//! Documents move through a fixed extract, classify, chunk, embed,
//! store sequence. This module owns the pieces around that sequence:
//! - Admission and cancellation ([`RunRegistry`])
//! - Progress fan-out to observers ([`ProgressBus`])
//! - The run loop itself ([`Orchestrator`])

pub mod bus;
pub mod progress;
pub mod registry;
pub mod run;
pub mod stages;

pub use bus::{ProgressBus, Subscription};
pub use progress::{PipelineStage, ProgressEvent, ProgressFrame, STAGE_SEQUENCE};
pub use registry::RunRegistry;
pub use run::{Orchestrator, RunOutcome, RunTicket};
pub use stages::{
    Classification, DraftChunk, ExtractedContent, RunArtifact, Section, Stage, StageSet,
};
