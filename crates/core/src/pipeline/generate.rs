//! Resume a job after the questionnaire: draft requirements from the gap
//! analysis plus the stakeholder's answers, store them, then generate test
//! cases for what was stored.

use futures::future::join_all;

use super::context::{GenerateOutput, GenerateRequest, TestCaseSummary};
use super::orchestrator::Orchestrator;
use super::stage::StageReporter;
use super::store::{summarize_persisted, Persisted};
use crate::error::{PipelineError, PipelineResult};
use crate::progress::Step;
use crate::skills::{fallback, recover, requirement_skill, test_case_skill, SkillContext};
use crate::state::StoredRequirement;

impl Orchestrator {
    #[tracing::instrument(skip(self, request), fields(document_id = %request.document_id, answers = request.gap_answers.len()))]
    pub async fn generate_from_answers(&self, request: GenerateRequest) -> PipelineResult<GenerateOutput> {
        let reporter = StageReporter::begin(
            &self.progress,
            &request.document_id,
            Step::Store,
            "Generating requirements from answers",
        );
        let result = self.draft_and_persist(&reporter, &request).await;
        let persisted = reporter.finish(result, summarize_persisted)?;
        self.finish_job(&request.document_id, persisted.requirements.len());

        // The job is already complete, so this is reported in the response only
        let test_cases = self.generate_test_cases_for(&persisted.requirements).await;

        Ok(GenerateOutput {
            saved_requirements: persisted.requirements.len(),
            failed_requirements: persisted.failed,
            requirements: persisted.requirements,
            test_cases,
        })
    }

    async fn draft_and_persist(
        &self,
        reporter: &StageReporter<'_>,
        request: &GenerateRequest,
    ) -> PipelineResult<Persisted> {
        if request.project_id.trim().is_empty() {
            return Err(PipelineError::InvalidInput("projectId is required".into()));
        }
        let model = self.model()?;
        let ctx = self.skill_context(model.as_ref());
        let content = request.content.as_deref().unwrap_or_default();

        let drafts = recover(
            requirement_skill::generate_from_answers(
                &ctx,
                &request.analysis,
                &request.gap_answers,
                content,
            )
            .await,
            "requirements from answers",
            || {
                let labels: Vec<&str> = request
                    .analysis
                    .significant_gaps()
                    .map(|(_, gap)| gap.label())
                    .collect();
                fallback::requirements(&labels)
            },
        )?;
        if drafts.used_fallback {
            reporter.progress_with(
                0,
                drafts.value.len() as u32,
                "Model output unusable; using fallback requirements",
                serde_json::json!({ "fallback": true }),
            );
        }

        self.persist_drafts(
            reporter,
            &request.project_id,
            Some(&request.document_id),
            &drafts.value,
        )
        .await
    }

    /// Generate and save test cases for each requirement. Requirements run
    /// `test_cases.concurrency` at a time with a pause between batches.
    /// `failed` counts requirements whose generation failed plus test cases
    /// that could not be saved.
    pub async fn generate_test_cases_for(&self, requirements: &[StoredRequirement]) -> TestCaseSummary {
        let mut summary = TestCaseSummary::default();
        if requirements.is_empty() {
            return summary;
        }
        let model = match self.model() {
            Ok(model) => model,
            Err(e) => {
                tracing::warn!(kind = e.kind(), "Skipping test case generation: {}", e);
                summary.failed = requirements.len();
                return summary;
            }
        };
        let ctx = self.skill_context(model.as_ref());
        let concurrency = self.config.test_cases.concurrency.max(1);

        for (batch_index, batch) in requirements.chunks(concurrency).enumerate() {
            if batch_index > 0 {
                tokio::time::sleep(self.batch_pause()).await;
            }
            let results = join_all(batch.iter().map(|r| self.test_cases_for(&ctx, r))).await;
            for (generated, failed) in results {
                summary.generated += generated;
                summary.failed += failed;
            }
        }

        tracing::info!(
            requirements = requirements.len(),
            generated = summary.generated,
            failed = summary.failed,
            "Test case generation finished"
        );
        summary
    }

    /// Returns (saved, failed) for one requirement
    async fn test_cases_for(&self, ctx: &SkillContext<'_>, requirement: &StoredRequirement) -> (usize, usize) {
        let drafts = recover(
            test_case_skill::generate_test_cases(ctx, &requirement.draft).await,
            "test cases",
            || fallback::test_cases(&requirement.draft),
        );
        let drafts = match drafts {
            Ok(recovered) => recovered.value,
            Err(e) => {
                tracing::warn!(requirement_id = %requirement.id, kind = e.kind(), "Test case generation failed: {}", e);
                return (0, 1);
            }
        };

        let mut saved = 0;
        let mut failed = 0;
        for draft in &drafts {
            match self.repository.create_test_case(&requirement.id, draft).await {
                Ok(_) => saved += 1,
                Err(e) => {
                    tracing::warn!(requirement_id = %requirement.id, title = %draft.title, "Test case not saved: {}", e);
                    failed += 1;
                }
            }
        }
        (saved, failed)
    }
}
