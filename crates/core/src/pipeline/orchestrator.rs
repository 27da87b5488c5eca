//! # Pipeline Orchestrator
//!
//! Owns the collaborators every stage needs and the branching between
//! stages. Each stage is its own entry point: the caller hands back the
//! previous stage's output to run the next one. [`Orchestrator::run_to_completion`]
//! drives the same steps in one call for unattended use.

use std::sync::Arc;
use std::time::Duration;

use super::context::{AnalyzeOutput, StoreOutput, UploadInput};
use super::stage::NextStep;
use crate::config::PipelineConfig;
use crate::error::PipelineResult;
use crate::models::GenerativeModel;
use crate::progress::ProgressStore;
use crate::skills::{Prompts, SkillContext};
use crate::state::RequirementRepository;
use crate::storage::{BlobStore, LocalBlobStore};

/// How an unattended run ended
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    /// No significant gaps; requirements were stored
    Stored(StoreOutput),
    /// Gaps found; answers are needed before requirements can be generated
    AwaitingAnswers(AnalyzeOutput),
}

pub struct Orchestrator {
    pub(super) progress: Arc<ProgressStore>,
    pub(super) repository: Arc<dyn RequirementRepository>,
    pub(super) config: PipelineConfig,
    pub(super) prompts: Arc<Prompts>,
    blob_store: Option<Arc<dyn BlobStore>>,
    model: Option<Arc<dyn GenerativeModel>>,
}

impl Orchestrator {
    pub fn new(
        progress: Arc<ProgressStore>,
        repository: Arc<dyn RequirementRepository>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            progress,
            repository,
            config,
            prompts: Arc::new(Prompts::defaults()),
            blob_store: None,
            model: None,
        }
    }

    /// Use this blob store instead of one rooted at the configured directory
    pub fn with_blob_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.blob_store = Some(store);
        self
    }

    /// Use this model instead of building one from the configured provider
    pub fn with_model(mut self, model: Arc<dyn GenerativeModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_prompts(mut self, prompts: Prompts) -> Self {
        self.prompts = Arc::new(prompts);
        self
    }

    pub fn progress(&self) -> &Arc<ProgressStore> {
        &self.progress
    }

    pub fn repository(&self) -> &Arc<dyn RequirementRepository> {
        &self.repository
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Blob store for this run; a missing storage location is a configuration error
    pub(super) fn blobs(&self) -> PipelineResult<Arc<dyn BlobStore>> {
        match &self.blob_store {
            Some(store) => Ok(Arc::clone(store)),
            None => {
                let root = self.config.require_storage_dir()?;
                Ok(Arc::new(LocalBlobStore::new(root)))
            }
        }
    }

    /// Model for this run; a missing credential is a configuration error
    pub(super) fn model(&self) -> PipelineResult<Arc<dyn GenerativeModel>> {
        match &self.model {
            Some(model) => Ok(Arc::clone(model)),
            None => Ok(Arc::new(
                self.config.model.create_model(self.config.model_timeout())?,
            )),
        }
    }

    pub(super) fn skill_context<'a>(&'a self, model: &'a dyn GenerativeModel) -> SkillContext<'a> {
        SkillContext {
            model,
            prompts: &self.prompts,
            timeout: self.config.model_timeout(),
        }
    }

    pub(super) fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.config.test_cases.batch_pause_ms)
    }

    /// Run upload → extract → analyze → (store | stop at the questionnaire)
    #[tracing::instrument(skip(self, input), fields(project_id = %input.project_id, files = input.files.len()))]
    pub async fn run_to_completion(&self, input: UploadInput) -> PipelineResult<PipelineOutcome> {
        let upload = self.upload(input).await?;
        let mut next = NextStep::Extract(upload.context);

        loop {
            next = match next {
                NextStep::Extract(context) => NextStep::Analyze(self.extract(context).await?.context),
                NextStep::Analyze(context) => NextStep::after_analyze(self.analyze(context).await?),
                NextStep::Store(request) => NextStep::Done(self.store(request).await?),
                NextStep::AwaitAnswers(output) => {
                    tracing::info!(
                        document_id = %output.document_id,
                        questions = output.dynamic_questions.len(),
                        "Run paused for questionnaire"
                    );
                    return Ok(PipelineOutcome::AwaitingAnswers(output));
                }
                NextStep::Done(output) => return Ok(PipelineOutcome::Stored(output)),
            };
        }
    }
}
