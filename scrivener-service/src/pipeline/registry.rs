//! Run admission and cancellation tracking.
//!
//! At most one run per document. Admission is an atomic check-and-insert
//! on the registry; the slot stays occupied until the orchestrator
//! releases it, including across a cancellation that is still waiting
//! for the in-flight stage to return.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::PipelineError;

struct ActiveRun {
    token: CancellationToken,
    started_at: DateTime<Utc>,
}

/// Registry of in-flight runs keyed by document id
#[derive(Default)]
pub struct RunRegistry {
    runs: DashMap<String, ActiveRun>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self {
            runs: DashMap::new(),
        }
    }

    /// Claim the run slot for a document.
    ///
    /// Returns the run's cancellation token, or `AlreadyRunning` if the
    /// slot is taken. Two concurrent claims for the same document cannot
    /// both succeed; the entry insert is atomic.
    pub fn try_admit(&self, document_id: &str) -> Result<CancellationToken, PipelineError> {
        match self.runs.entry(document_id.to_string()) {
            Entry::Occupied(_) => Err(PipelineError::AlreadyRunning {
                document_id: document_id.to_string(),
            }),
            Entry::Vacant(slot) => {
                let token = CancellationToken::new();
                slot.insert(ActiveRun {
                    token: token.clone(),
                    started_at: Utc::now(),
                });
                metrics::gauge!("scrivener_active_runs").increment(1.0);
                Ok(token)
            }
        }
    }

    /// Request cancellation of a document's run.
    ///
    /// Fires the token but leaves the slot occupied; the run releases it
    /// once its current stage returns and the terminal state is
    /// recorded. Returns false when no run is active.
    pub fn cancel(&self, document_id: &str) -> bool {
        if let Some(run) = self.runs.get(document_id) {
            run.token.cancel();
            let running_for = Utc::now() - run.started_at;
            info!(
                doc_id = %document_id,
                running_ms = running_for.num_milliseconds(),
                "Run cancellation requested"
            );
            true
        } else {
            false
        }
    }

    /// Free a document's run slot. Idempotent.
    pub fn release(&self, document_id: &str) {
        if self.runs.remove(document_id).is_some() {
            metrics::gauge!("scrivener_active_runs").decrement(1.0);
        }
    }

    pub fn is_active(&self, document_id: &str) -> bool {
        self.runs.contains_key(document_id)
    }

    pub fn active_count(&self) -> usize {
        self.runs.len()
    }
}
