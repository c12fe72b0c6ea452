//! Run orchestration.
//!
//! `start_run` admits a document synchronously, then a spawned task
//! walks the stage sequence. Per stage the task checks for
//! cancellation, persists the new status, publishes the milestone
//! event, and only then executes the stage. Terminal handling always
//! runs in the same order: persist, release the slot, publish.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::bus::ProgressBus;
use super::progress::{PipelineStage, ProgressEvent};
use super::registry::RunRegistry;
use super::stages::{RunArtifact, StageSet};
use crate::db::{Database, Document, ProcessingStatus};
use crate::error::{PipelineError, format_error_chain};

/// Terminal result of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { chunk_count: usize },
    Failed { stage: PipelineStage, error: String },
    Cancelled,
}

/// Handle for an admitted run.
///
/// The run itself is detached; dropping the ticket does not stop it.
pub struct RunTicket {
    document_id: String,
    done: oneshot::Receiver<RunOutcome>,
}

impl RunTicket {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Wait for the run to reach a terminal state.
    ///
    /// `None` means the run task went away without reporting, which
    /// only happens if it panicked.
    pub async fn outcome(self) -> Option<RunOutcome> {
        self.done.await.ok()
    }
}

/// Drives documents through the fixed stage sequence
pub struct Orchestrator {
    db: Arc<Database>,
    bus: Arc<ProgressBus>,
    registry: Arc<RunRegistry>,
    stages: StageSet,
}

impl Orchestrator {
    pub fn new(
        db: Arc<Database>,
        bus: Arc<ProgressBus>,
        registry: Arc<RunRegistry>,
        stages: StageSet,
    ) -> Self {
        Self {
            db,
            bus,
            registry,
            stages,
        }
    }

    /// Admit a document and spawn its run.
    ///
    /// Admission is atomic: of any number of concurrent calls for the
    /// same document, exactly one gets a ticket and the rest get
    /// `AlreadyRunning`, decided before this function returns. The
    /// pending status is persisted before the task is spawned.
    pub fn start_run(self: &Arc<Self>, document: &Document) -> Result<RunTicket, PipelineError> {
        let token = self.registry.try_admit(&document.id)?;

        if let Err(e) = self
            .db
            .update_status(&document.id, ProcessingStatus::Pending, None)
        {
            self.registry.release(&document.id);
            return Err(PipelineError::Persist(e));
        }

        metrics::counter!("scrivener_runs_started_total").increment(1);
        info!(doc_id = %document.id, filename = %document.filename, "Run admitted");

        let (done_tx, done_rx) = oneshot::channel();
        let orchestrator = Arc::clone(self);
        let document = document.clone();
        tokio::spawn(async move {
            let outcome = orchestrator.execute_run(document, token).await;
            let _ = done_tx.send(outcome);
        });

        Ok(RunTicket {
            document_id: document.id.clone(),
            done: done_rx,
        })
    }

    /// Request cancellation of a document's active run.
    ///
    /// The run stops at its next stage boundary; the stage in flight is
    /// not interrupted. This is a control path, not a failure: callers
    /// get `NotRunning` when there is nothing to cancel.
    pub fn cancel_run(&self, document_id: &str) -> Result<(), PipelineError> {
        if self.registry.cancel(document_id) {
            Ok(())
        } else {
            Err(PipelineError::NotRunning {
                document_id: document_id.to_string(),
            })
        }
    }

    async fn execute_run(&self, document: Document, token: CancellationToken) -> RunOutcome {
        let doc_id = document.id.clone();
        let mut artifact = RunArtifact::new(document);

        for stage in self.stages.sequence() {
            let stage_id = stage.stage();

            if token.is_cancelled() {
                return self.finish_cancelled(&doc_id);
            }

            // Status lands in the store before the milestone goes out,
            // and both happen before the stage runs.
            if let Err(e) = self.db.update_status(&doc_id, stage_id.into(), None) {
                let failure = PipelineError::Persist(e);
                error!(
                    doc_id = %doc_id,
                    stage = %stage_id,
                    error = %format_error_chain(&failure),
                    "Failed to persist stage status"
                );
                return self.finish_failed(&doc_id, stage_id, format_error_chain(&failure));
            }
            self.bus
                .publish(&ProgressEvent::stage_entry(&doc_id, stage_id));

            artifact = match stage.execute(artifact).await {
                Ok(artifact) => artifact,
                Err(source) => {
                    let failure = PipelineError::StageFailure {
                        stage: stage_id,
                        source,
                    };
                    let message = format_error_chain(&failure);
                    error!(doc_id = %doc_id, stage = %stage_id, error = %message, "Stage failed");
                    return self.finish_failed(&doc_id, stage_id, message);
                }
            };
        }

        let chunk_count = artifact.stored_chunks;
        if let Err(e) = self
            .db
            .update_status(&doc_id, ProcessingStatus::Completed, None)
        {
            // Chunks are stored but the completed status is not;
            // reporting success over the wire would contradict what a
            // restart will see, so this counts as a failure.
            let failure = PipelineError::Persist(e);
            error!(
                doc_id = %doc_id,
                error = %format_error_chain(&failure),
                "Failed to mark run completed"
            );
            return self.finish_failed(&doc_id, PipelineStage::Storing, format_error_chain(&failure));
        }

        self.registry.release(&doc_id);
        self.bus.publish(&ProgressEvent::completed(&doc_id));
        metrics::counter!("scrivener_runs_completed_total").increment(1);
        info!(doc_id = %doc_id, chunks = chunk_count, "Run complete");
        RunOutcome::Completed { chunk_count }
    }

    fn finish_failed(&self, doc_id: &str, stage: PipelineStage, message: String) -> RunOutcome {
        if let Err(e) = self
            .db
            .update_status(doc_id, ProcessingStatus::Failed, Some(&message))
        {
            warn!(
                doc_id = %doc_id,
                error = %format_error_chain(&e),
                "Failed to mark run failed"
            );
        }
        self.registry.release(doc_id);
        self.bus.publish(&ProgressEvent::failed(doc_id, message.clone()));
        metrics::counter!("scrivener_runs_failed_total").increment(1);
        RunOutcome::Failed {
            stage,
            error: message,
        }
    }

    fn finish_cancelled(&self, doc_id: &str) -> RunOutcome {
        if let Err(e) = self
            .db
            .update_status(doc_id, ProcessingStatus::Cancelled, None)
        {
            warn!(
                doc_id = %doc_id,
                error = %format_error_chain(&e),
                "Failed to mark run cancelled"
            );
        }
        self.registry.release(doc_id);
        self.bus.publish(&ProgressEvent::cancelled(doc_id));
        metrics::counter!("scrivener_runs_cancelled_total").increment(1);
        info!(doc_id = %doc_id, "Run cancelled");
        RunOutcome::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageError;
    use crate::pipeline::stages::Stage;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::sync::{Notify, mpsc};

    struct StubStage {
        id: PipelineStage,
        calls: Arc<Mutex<Vec<PipelineStage>>>,
        fail: bool,
        entered: Option<mpsc::UnboundedSender<PipelineStage>>,
        proceed: Option<Arc<Notify>>,
        store_count: usize,
    }

    impl StubStage {
        fn passing(id: PipelineStage, calls: &Arc<Mutex<Vec<PipelineStage>>>) -> Arc<dyn Stage> {
            Arc::new(Self {
                id,
                calls: Arc::clone(calls),
                fail: false,
                entered: None,
                proceed: None,
                store_count: 3,
            })
        }

        fn failing(id: PipelineStage, calls: &Arc<Mutex<Vec<PipelineStage>>>) -> Arc<dyn Stage> {
            Arc::new(Self {
                id,
                calls: Arc::clone(calls),
                fail: true,
                entered: None,
                proceed: None,
                store_count: 0,
            })
        }

        fn gated(
            id: PipelineStage,
            calls: &Arc<Mutex<Vec<PipelineStage>>>,
            entered: mpsc::UnboundedSender<PipelineStage>,
            proceed: Arc<Notify>,
        ) -> Arc<dyn Stage> {
            Arc::new(Self {
                id,
                calls: Arc::clone(calls),
                fail: false,
                entered: Some(entered),
                proceed: Some(proceed),
                store_count: 3,
            })
        }
    }

    #[async_trait]
    impl Stage for StubStage {
        fn stage(&self) -> PipelineStage {
            self.id
        }

        async fn execute(&self, mut artifact: RunArtifact) -> Result<RunArtifact, StageError> {
            self.calls.lock().unwrap().push(self.id);
            if let Some(entered) = &self.entered {
                let _ = entered.send(self.id);
            }
            if let Some(proceed) = &self.proceed {
                proceed.notified().await;
            }
            if self.fail {
                return Err(StageError::EmptyDocument);
            }
            if self.id == PipelineStage::Storing {
                artifact.stored_chunks = self.store_count;
            }
            Ok(artifact)
        }
    }

    struct Harness {
        _dir: TempDir,
        db: Arc<Database>,
        bus: Arc<ProgressBus>,
        registry: Arc<RunRegistry>,
        orchestrator: Arc<Orchestrator>,
        calls: Arc<Mutex<Vec<PipelineStage>>>,
    }

    fn all_passing(calls: &Arc<Mutex<Vec<PipelineStage>>>) -> StageSet {
        StageSet {
            extract: StubStage::passing(PipelineStage::Extracting, calls),
            classify: StubStage::passing(PipelineStage::Classifying, calls),
            chunk: StubStage::passing(PipelineStage::Chunking, calls),
            embed: StubStage::passing(PipelineStage::Embedding, calls),
            store: StubStage::passing(PipelineStage::Storing, calls),
        }
    }

    fn harness_with(build: impl FnOnce(&Arc<Mutex<Vec<PipelineStage>>>) -> StageSet) -> Harness {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("test.db")).unwrap());
        let bus = Arc::new(ProgressBus::new(32));
        let registry = Arc::new(RunRegistry::new());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let stages = build(&calls);
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&db),
            Arc::clone(&bus),
            Arc::clone(&registry),
            stages,
        ));
        Harness {
            _dir: dir,
            db,
            bus,
            registry,
            orchestrator,
            calls,
        }
    }

    fn insert_document(db: &Database, id: &str) -> Document {
        let doc = Document {
            id: id.to_string(),
            filename: format!("{id}.md"),
            storage_path: format!("/tmp/{id}.md"),
            file_hash: "hash".to_string(),
            status: ProcessingStatus::Pending,
            error: None,
            metadata: None,
            chunk_count: 0,
            submitted_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        };
        db.insert_document(&doc).unwrap();
        doc
    }

    async fn drain_until_terminal(
        sub: &mut crate::pipeline::bus::Subscription,
    ) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = sub.recv().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }

    #[tokio::test]
    async fn completed_run_emits_the_full_milestone_sequence() {
        let h = harness_with(all_passing);
        let doc = insert_document(&h.db, "doc-1");
        let mut sub = h.bus.subscribe("doc-1");

        let ticket = h.orchestrator.start_run(&doc).unwrap();
        let outcome = ticket.outcome().await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed { chunk_count: 3 });

        let events = drain_until_terminal(&mut sub).await;
        let stages: Vec<PipelineStage> = events.iter().map(|e| e.stage).collect();
        assert_eq!(
            stages,
            vec![
                PipelineStage::Extracting,
                PipelineStage::Classifying,
                PipelineStage::Chunking,
                PipelineStage::Embedding,
                PipelineStage::Storing,
                PipelineStage::Complete,
            ]
        );
        let percents: Vec<u8> = events.iter().map(|e| e.progress).collect();
        assert_eq!(percents, vec![20, 35, 50, 70, 85, 100]);
        assert!(events.iter().all(|e| e.error.is_none()));

        // Exactly one terminal event; the bus closes afterwards.
        assert!(sub.recv().await.is_none());

        let stored = h.db.get_document("doc-1").unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Completed);
        assert!(stored.completed_at.is_some());
        assert!(!h.registry.is_active("doc-1"));
    }

    #[tokio::test]
    async fn failing_stage_ends_the_run_with_a_failed_event() {
        let h = harness_with(|calls| StageSet {
            embed: StubStage::failing(PipelineStage::Embedding, calls),
            ..all_passing(calls)
        });
        let doc = insert_document(&h.db, "doc-1");
        let mut sub = h.bus.subscribe("doc-1");

        let ticket = h.orchestrator.start_run(&doc).unwrap();
        let outcome = ticket.outcome().await.unwrap();
        match outcome {
            RunOutcome::Failed { stage, error } => {
                assert_eq!(stage, PipelineStage::Embedding);
                assert!(error.contains("embedding stage failed"));
            }
            other => panic!("expected failure, got {other:?}"),
        }

        let events = drain_until_terminal(&mut sub).await;
        let last = events.last().unwrap();
        assert_eq!(last.stage, PipelineStage::Failed);
        assert_eq!(last.progress, 0);
        assert!(last.error.as_deref().unwrap().contains("embedding stage failed"));

        // The storing stage never ran.
        assert!(!h.calls.lock().unwrap().contains(&PipelineStage::Storing));

        let stored = h.db.get_document("doc-1").unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Failed);
        assert!(stored.error.is_some());
        assert!(!h.registry.is_active("doc-1"));
    }

    #[tokio::test]
    async fn second_submission_is_refused_while_a_run_is_active() {
        let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
        let proceed = Arc::new(Notify::new());
        let gate = Arc::clone(&proceed);
        let h = harness_with(move |calls| StageSet {
            extract: StubStage::gated(PipelineStage::Extracting, calls, entered_tx, gate),
            ..all_passing(calls)
        });
        let doc = insert_document(&h.db, "doc-1");

        let ticket = h.orchestrator.start_run(&doc).unwrap();
        entered_rx.recv().await.unwrap();

        let refused = h.orchestrator.start_run(&doc);
        assert!(matches!(
            refused,
            Err(PipelineError::AlreadyRunning { .. })
        ));

        proceed.notify_one();
        let outcome = ticket.outcome().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed { .. }));

        // After the terminal state the slot is free again.
        let ticket = h.orchestrator.start_run(&doc).unwrap();
        proceed.notify_one();
        assert!(matches!(
            ticket.outcome().await.unwrap(),
            RunOutcome::Completed { .. }
        ));
    }

    #[tokio::test]
    async fn status_is_persisted_before_the_milestone_event() {
        let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
        let proceed = Arc::new(Notify::new());
        let gate = Arc::clone(&proceed);
        let h = harness_with(move |calls| StageSet {
            classify: StubStage::gated(PipelineStage::Classifying, calls, entered_tx, gate),
            ..all_passing(calls)
        });
        let doc = insert_document(&h.db, "doc-1");
        let mut sub = h.bus.subscribe("doc-1");

        let ticket = h.orchestrator.start_run(&doc).unwrap();

        // When the classifying milestone arrives, the persisted status
        // must already say classifying.
        loop {
            let event = sub.recv().await.unwrap();
            if event.stage == PipelineStage::Classifying {
                break;
            }
        }
        entered_rx.recv().await.unwrap();
        let stored = h.db.get_document("doc-1").unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Classifying);

        proceed.notify_one();
        ticket.outcome().await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_lands_at_the_next_stage_boundary() {
        let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
        let proceed = Arc::new(Notify::new());
        let gate = Arc::clone(&proceed);
        let h = harness_with(move |calls| StageSet {
            extract: StubStage::gated(PipelineStage::Extracting, calls, entered_tx, gate),
            ..all_passing(calls)
        });
        let doc = insert_document(&h.db, "doc-1");
        let mut sub = h.bus.subscribe("doc-1");

        let ticket = h.orchestrator.start_run(&doc).unwrap();
        entered_rx.recv().await.unwrap();

        // Cancel while extract is in flight; the slot stays taken until
        // the stage returns.
        h.orchestrator.cancel_run("doc-1").unwrap();
        assert!(h.registry.is_active("doc-1"));

        proceed.notify_one();
        let outcome = ticket.outcome().await.unwrap();
        assert_eq!(outcome, RunOutcome::Cancelled);

        let events = drain_until_terminal(&mut sub).await;
        let last = events.last().unwrap();
        assert_eq!(last.stage, PipelineStage::Cancelled);
        assert_eq!(last.progress, 0);
        assert!(last.error.is_none());

        // Extract ran, classify never did.
        let calls = h.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![PipelineStage::Extracting]);

        let stored = h.db.get_document("doc-1").unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Cancelled);

        // Re-submission is accepted now that the slot is free.
        assert!(h.orchestrator.start_run(&doc).is_ok());
    }

    #[tokio::test]
    async fn cancel_without_an_active_run_is_not_running() {
        let h = harness_with(all_passing);
        insert_document(&h.db, "doc-1");

        let result = h.orchestrator.cancel_run("doc-1");
        assert!(matches!(result, Err(PipelineError::NotRunning { .. })));
    }

    #[tokio::test]
    async fn concurrent_submissions_admit_exactly_one_run() {
        let h = harness_with(all_passing);
        let doc = insert_document(&h.db, "doc-1");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let orchestrator = Arc::clone(&h.orchestrator);
            let doc = doc.clone();
            handles.push(tokio::spawn(async move {
                orchestrator.start_run(&doc).is_ok()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn stages_run_in_the_fixed_order() {
        let h = harness_with(all_passing);
        let doc = insert_document(&h.db, "doc-1");

        let ticket = h.orchestrator.start_run(&doc).unwrap();
        ticket.outcome().await.unwrap();

        let calls = h.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                PipelineStage::Extracting,
                PipelineStage::Classifying,
                PipelineStage::Chunking,
                PipelineStage::Embedding,
                PipelineStage::Storing,
            ]
        );
    }
}
