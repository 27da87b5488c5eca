//! # Stage State Machine
//!
//! Every stage reports through a [`StageReporter`]: one `processing` event
//! when it begins, any number of sub-progress events, then exactly one
//! terminal event. Completing or failing consumes the reporter, so a second
//! terminal event cannot be written.

use serde_json::Value;

use super::context::{AnalyzeOutput, PipelineContext, StoreOutput, StoreRequest};
use crate::error::{PipelineError, PipelineResult};
use crate::progress::{ProgressStore, ProgressUpdate, Step};

/// Lifecycle of one step within a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageState {
    Processing,
    Completed,
    Failed,
}

pub struct StageReporter<'a> {
    store: &'a ProgressStore,
    job_id: String,
    step: Step,
    state: StageState,
}

impl<'a> StageReporter<'a> {
    /// Enter `processing` for `step`
    pub fn begin(
        store: &'a ProgressStore,
        job_id: &str,
        step: Step,
        message: impl Into<String>,
    ) -> Self {
        store.append(job_id, ProgressUpdate::processing(step, message));
        Self {
            store,
            job_id: job_id.to_string(),
            step,
            state: StageState::Processing,
        }
    }

    /// Sub-progress within the step
    pub fn progress(&self, current: u32, total: u32, message: impl Into<String>) {
        self.store.append(
            &self.job_id,
            ProgressUpdate::processing(self.step, message).with_progress(current, total),
        );
    }

    /// Sub-progress with step-specific details
    pub fn progress_with(&self, current: u32, total: u32, message: impl Into<String>, details: Value) {
        self.store.append(
            &self.job_id,
            ProgressUpdate::processing(self.step, message)
                .with_progress(current, total)
                .with_details(details),
        );
    }

    pub fn complete(mut self, message: impl Into<String>, details: Option<Value>) {
        let mut update = ProgressUpdate::completed(self.step, message);
        if let Some(details) = details {
            update = update.with_details(details);
        }
        self.store.append(&self.job_id, update);
        self.state = StageState::Completed;
    }

    pub fn fail(mut self, error: &PipelineError) {
        tracing::warn!(
            job_id = %self.job_id,
            step = %self.step,
            kind = error.kind(),
            "Stage failed: {}",
            error
        );
        self.store
            .append(&self.job_id, ProgressUpdate::failed(self.step, error));
        self.state = StageState::Failed;
    }

    /// Close the step from a stage body's result
    pub fn finish<T>(
        self,
        result: PipelineResult<T>,
        summarize: impl FnOnce(&T) -> (String, Option<Value>),
    ) -> PipelineResult<T> {
        match result {
            Ok(value) => {
                let (message, details) = summarize(&value);
                self.complete(message, details);
                Ok(value)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }
}

impl Drop for StageReporter<'_> {
    fn drop(&mut self) {
        // Dropped mid-stage (cancelled future or panic): close the step
        if self.state == StageState::Processing {
            let error = PipelineError::UpstreamService(format!(
                "{} stage was interrupted before finishing",
                self.step
            ));
            self.store
                .append(&self.job_id, ProgressUpdate::failed(self.step, &error));
            self.state = StageState::Failed;
        }
    }
}

/// Where a job goes after a stage returns
#[derive(Debug, Clone)]
pub enum NextStep {
    Extract(PipelineContext),
    Analyze(PipelineContext),
    Store(StoreRequest),
    /// Gaps found; the job waits for questionnaire answers
    AwaitAnswers(AnalyzeOutput),
    Done(StoreOutput),
}

impl NextStep {
    /// Branch on the analyze result
    pub fn after_analyze(output: AnalyzeOutput) -> Self {
        if output.has_gaps {
            NextStep::AwaitAnswers(output)
        } else {
            NextStep::Store(output.store_request())
        }
    }
}
