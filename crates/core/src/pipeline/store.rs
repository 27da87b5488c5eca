//! Store stage: persist requirement drafts and close the job.

use serde_json::json;

use super::context::{StoreOutput, StoreRequest};
use super::orchestrator::Orchestrator;
use super::stage::StageReporter;
use crate::error::{PipelineError, PipelineResult};
use crate::progress::{ProgressUpdate, Step};
use crate::skills::RequirementDraft;
use crate::state::StoredRequirement;

/// Outcome of persisting a batch of drafts
#[derive(Debug, Clone, Default)]
pub(super) struct Persisted {
    pub requirements: Vec<StoredRequirement>,
    pub failed: usize,
}

impl Orchestrator {
    #[tracing::instrument(skip(self, request), fields(document_id = %request.document_id, drafts = request.requirements.len()))]
    pub async fn store(&self, request: StoreRequest) -> PipelineResult<StoreOutput> {
        let reporter = StageReporter::begin(
            &self.progress,
            &request.document_id,
            Step::Store,
            format!("Saving {} requirement(s)", request.requirements.len()),
        );
        let result = self
            .persist_drafts(
                &reporter,
                &request.project_id,
                Some(&request.document_id),
                &request.requirements,
            )
            .await;
        let persisted = reporter.finish(result, summarize_persisted)?;

        self.finish_job(&request.document_id, persisted.requirements.len());
        Ok(StoreOutput {
            document_id: request.document_id,
            saved_requirements: persisted.requirements.len(),
            failed_requirements: persisted.failed,
            requirements: persisted.requirements,
        })
    }

    /// Save each draft on its own; a failing record is counted, not fatal.
    /// The batch fails only when every draft of a non-empty batch failed.
    pub(super) async fn persist_drafts(
        &self,
        reporter: &StageReporter<'_>,
        project_id: &str,
        document_id: Option<&str>,
        drafts: &[RequirementDraft],
    ) -> PipelineResult<Persisted> {
        if project_id.trim().is_empty() {
            return Err(PipelineError::InvalidInput("projectId is required".into()));
        }

        let total = drafts.len() as u32;
        let mut persisted = Persisted::default();
        let mut last_error = None;

        for (index, draft) in drafts.iter().enumerate() {
            reporter.progress(index as u32, total, format!("Saving \"{}\"", draft.title));
            let result = match draft.validate() {
                Ok(()) => {
                    self.repository
                        .create_requirement(project_id, document_id, draft)
                        .await
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(stored) => persisted.requirements.push(stored),
                Err(e) => {
                    tracing::warn!(title = %draft.title, kind = e.kind(), "Requirement not saved: {}", e);
                    persisted.failed += 1;
                    last_error = Some(e);
                }
            }
        }

        if persisted.requirements.is_empty() {
            if let Some(e) = last_error {
                return Err(PipelineError::Persistence(format!(
                    "None of {} requirement(s) could be saved; last error: {}",
                    drafts.len(),
                    e
                )));
            }
        }
        Ok(persisted)
    }

    /// Emit the job's terminal `complete` event
    pub(super) fn finish_job(&self, document_id: &str, saved: usize) {
        self.progress.append(
            document_id,
            ProgressUpdate::completed(Step::Complete, "Processing complete")
                .with_details(json!({ "savedRequirements": saved })),
        );
        tracing::info!(document_id, saved, "Job complete");
    }
}

pub(super) fn summarize_persisted(persisted: &Persisted) -> (String, Option<serde_json::Value>) {
    let saved = persisted.requirements.len();
    let message = if persisted.failed == 0 {
        format!("Saved {} requirement(s)", saved)
    } else {
        format!(
            "Saved {} requirement(s), {} failed",
            saved, persisted.failed
        )
    };
    (
        message,
        Some(json!({
            "savedRequirements": saved,
            "failedRequirements": persisted.failed,
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::progress::{ProgressStore, StepStatus};
    use crate::state::{RequirementDb, RequirementRepository};
    use crate::testing::{MemoryBlobStore, MemoryRepository};
    use std::sync::Arc;

    fn draft(title: &str) -> RequirementDraft {
        RequirementDraft {
            title: title.into(),
            description: format!("The system shall support {}", title),
            priority: "medium".into(),
            category: "functional".into(),
            acceptance_criteria: vec![],
            source: None,
        }
    }

    fn orchestrator(repository: Arc<dyn RequirementRepository>) -> Orchestrator {
        Orchestrator::new(
            Arc::new(ProgressStore::default()),
            repository,
            PipelineConfig::default(),
        )
        .with_blob_store(Arc::new(MemoryBlobStore::new()))
    }

    fn request(drafts: Vec<RequirementDraft>) -> StoreRequest {
        StoreRequest {
            document_id: "doc-1".into(),
            project_id: "proj".into(),
            requirements: drafts,
        }
    }

    #[tokio::test]
    async fn test_partial_failure_still_completes_job() {
        let repository = Arc::new(MemoryRepository::new().rejecting("Exports"));
        let orchestrator = orchestrator(repository);
        let drafts = ["Login", "Exports", "Reports", "Search", "Billing"]
            .into_iter()
            .map(draft)
            .collect();

        let output = orchestrator.store(request(drafts)).await.unwrap();
        assert_eq!(output.saved_requirements, 4);
        assert_eq!(output.failed_requirements, 1);

        let history = orchestrator.progress().history("doc-1");
        let store_done = &history[history.len() - 2];
        assert_eq!((store_done.step, store_done.status), (Step::Store, StepStatus::Completed));
        assert_eq!(store_done.details.as_ref().unwrap()["failedRequirements"], 1);

        let last = history.last().unwrap();
        assert_eq!((last.step, last.status), (Step::Complete, StepStatus::Completed));
        assert_eq!(last.details.as_ref().unwrap()["savedRequirements"], 4);
        assert!(last.is_terminal());
    }

    #[tokio::test]
    async fn test_invalid_draft_is_counted_as_failed() {
        let orchestrator = orchestrator(Arc::new(MemoryRepository::new()));
        let mut blank = draft("Blank");
        blank.description = "  ".into();

        let output = orchestrator
            .store(request(vec![draft("Login"), blank]))
            .await
            .unwrap();
        assert_eq!(output.saved_requirements, 1);
        assert_eq!(output.failed_requirements, 1);
    }

    #[tokio::test]
    async fn test_all_failing_is_a_persistence_error() {
        let orchestrator = orchestrator(Arc::new(MemoryRepository::new().rejecting("Login")));

        let err = orchestrator
            .store(request(vec![draft("Login")]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "persistence_error");

        let history = orchestrator.progress().history("doc-1");
        let last = history.last().unwrap();
        assert_eq!((last.step, last.status), (Step::Store, StepStatus::Error));
        assert!(history.iter().all(|e| e.step != Step::Complete));
    }

    #[tokio::test]
    async fn test_empty_batch_completes() {
        let orchestrator = orchestrator(Arc::new(MemoryRepository::new()));
        let output = orchestrator.store(request(vec![])).await.unwrap();
        assert_eq!(output.saved_requirements, 0);

        let last = orchestrator.progress().history("doc-1").pop().unwrap();
        assert_eq!(last.step, Step::Complete);
    }

    #[tokio::test]
    async fn test_store_writes_to_database() {
        let db = Arc::new(RequirementDb::open_in_memory().unwrap());
        let orchestrator = orchestrator(db.clone());

        orchestrator
            .store(request(vec![draft("Login"), draft("Reports")]))
            .await
            .unwrap();

        let saved = db.list_requirements("proj").await.unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].document_id.as_deref(), Some("doc-1"));
    }
}
